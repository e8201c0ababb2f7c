pub mod fixtures;
pub mod scripted;

#[allow(unused_imports)]
pub use fixtures::{TestEnv, package_archive, test_pipeline_config, title_edit};
#[allow(unused_imports)]
pub use scripted::ScriptedStore;
