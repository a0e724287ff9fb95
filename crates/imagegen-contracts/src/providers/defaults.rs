use indexmap::IndexMap;

use super::{ProviderDescriptor, RateLimitQuota};

pub const JIMENG_ENDPOINT: &str = "https://api.jimeng.ai/v1/images/generations";
pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/images/generations";
pub const STABILITY_ENDPOINT: &str =
    "https://api.stability.ai/v1/generation/stable-diffusion-xl-1024-v1-0/text-to-image";

/// Seeded descriptors, in declaration order.
pub fn default_providers() -> IndexMap<String, ProviderDescriptor> {
    let mut map = IndexMap::new();
    let mut insert = |id: &str,
                      name: &str,
                      endpoint: &str,
                      sizes: &[&str],
                      qualities: &[&str],
                      styles: &[&str],
                      requests_per_minute: u32,
                      tokens_per_minute: u32| {
        map.insert(
            id.to_string(),
            ProviderDescriptor {
                name: name.to_string(),
                endpoint: endpoint.to_string(),
                required_params: vec!["prompt".to_string()],
                supported_sizes: strings(sizes),
                supported_qualities: strings(qualities),
                supported_styles: strings(styles),
                rate_limit: RateLimitQuota {
                    requests_per_minute,
                    tokens_per_minute,
                },
                api_key_env: None,
                family: None,
            },
        );
    };

    insert(
        "jimeng",
        "即梦AI",
        JIMENG_ENDPOINT,
        &["1024x1024", "512x512", "256x256"],
        &["standard", "hd"],
        &["natural", "anime", "realistic"],
        60,
        10_000,
    );
    insert(
        "openai",
        "OpenAI DALL-E",
        OPENAI_ENDPOINT,
        &["1024x1024", "1024x1792", "1792x1024"],
        &["standard", "hd"],
        &["vivid", "natural"],
        50,
        100_000,
    );
    insert(
        "stability",
        "Stability AI",
        STABILITY_ENDPOINT,
        &["1024x1024", "512x512", "768x768"],
        &["standard", "high"],
        &["realistic", "artistic", "cartoon"],
        100,
        50_000,
    );

    map
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
