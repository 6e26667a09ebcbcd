// Library surface for the binary and for headless/integration tests.
// Terminal rendering stays in the binary.
pub mod app_dirs;
pub mod chunker;
pub mod config;
pub mod error;
pub mod hash;
pub mod hud;
pub mod importer;
pub mod library;
pub mod locale;
pub mod rng;
pub mod runtime;
pub mod session;
pub mod store;
pub mod util;
