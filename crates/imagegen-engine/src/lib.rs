//! Provider clients, retry/backoff and generation orchestration on top of
//! `imagegen-contracts`.

pub mod generator;
pub mod imaging;
pub mod providers;
pub mod retry;

pub use generator::ImageGenerator;
pub use imaging::{ImageError, ImageInfo};
pub use providers::{
    build_provider, ImageProvider, ImageProviderRegistry, JimengProvider, OpenAiProvider,
    ProviderHttp, StabilityProvider,
};
pub use retry::{run_with_retry, RetryMode, RetryPolicy, Sleeper, ThreadSleeper};
