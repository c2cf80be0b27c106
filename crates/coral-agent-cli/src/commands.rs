pub mod coralize;
pub mod run;
pub mod version;
