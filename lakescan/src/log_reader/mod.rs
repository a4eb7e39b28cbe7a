//! Reading and decoding individual log files.

pub(crate) mod checkpoint;
pub(crate) mod commit;
