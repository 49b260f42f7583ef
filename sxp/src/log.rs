// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

macro_rules! connection_log {
    ($self:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_SXP,
            "module" => crate::MOD_STRATEGY,
            "unit" => crate::UNIT_CONNECTION,
            "peer" => $self.channel.peer().to_string(),
            "version" => u8::from($self.version),
            "state" => $self.state.to_string(),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_SXP,
            "module" => crate::MOD_STRATEGY,
            "unit" => crate::UNIT_CONNECTION,
            "peer" => $self.channel.peer().to_string(),
            "version" => u8::from($self.version),
            "state" => $self.state.to_string(),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_SXP,
            "module" => crate::MOD_STRATEGY,
            "unit" => crate::UNIT_CONNECTION,
            "peer" => $self.channel.peer().to_string(),
            "version" => u8::from($self.version),
            "state" => $self.state.to_string(),
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_SXP,
            "module" => crate::MOD_STRATEGY,
            "unit" => crate::UNIT_CONNECTION,
            "peer" => $self.channel.peer().to_string(),
            "version" => u8::from($self.version),
            "state" => $self.state.to_string(),
        )
    };
}

pub(crate) use connection_log;
