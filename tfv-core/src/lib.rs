pub mod lock;
pub mod metadata;
pub mod path;
pub mod version;
pub mod workspace;
