//! Bitcoin SV protocol messages and their wire formats.

pub mod external;
