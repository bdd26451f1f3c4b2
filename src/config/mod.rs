mod settings;

pub use settings::{
    save_default_model, save_default_model_to, Config, SidebarConfig, TimingConfig, EXAMPLE_CONFIG,
};
