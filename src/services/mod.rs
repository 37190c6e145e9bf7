pub mod chunk;
pub mod filename;
pub mod folder;
pub mod remote;
pub mod worker;
