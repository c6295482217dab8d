pub mod cores;
pub mod decoder;
pub mod diagnostics;
pub mod features;
pub mod hardware;
pub mod probe;
pub mod range;
pub mod vendor;
