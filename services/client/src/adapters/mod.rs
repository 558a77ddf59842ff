pub mod fingerprint;
pub mod http_api;
pub mod image_cache;
pub mod vibrator;
pub mod ws_transport;

pub use fingerprint::MachineFingerprint;
pub use http_api::HttpPersonalizationApi;
pub use image_cache::HttpImageLoader;
pub use vibrator::TracingVibrator;
pub use ws_transport::TungsteniteConnector;
