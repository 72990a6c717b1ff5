//! Method names accepted on the spidev channel.

use strum::{EnumString, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum Method {
    Open,
    SetMode,
    GetMode,
    SetMaxSpeed,
    GetMaxSpeed,
    SetWordSize,
    GetWordSize,
    Transmit,
    Close,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}
