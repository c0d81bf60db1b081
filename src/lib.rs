pub mod messaging;
pub mod peer;
pub mod splitter;
pub mod team;
pub mod util;
pub mod test_util;
