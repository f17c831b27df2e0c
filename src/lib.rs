pub mod app_state;
pub mod claude_settings;
pub mod constants;
pub mod logging;
pub mod orchestrator;
