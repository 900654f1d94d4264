pub mod pulse;

pub use pulse::{
    ClientSection, FeedSection, InferenceSection, JobSection, ProxySection, PulseConfig,
    ServerSection, DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH,
};
