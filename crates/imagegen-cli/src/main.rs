use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use imagegen_contracts::providers::DEFAULT_CONFIG_PATH;
use imagegen_contracts::{
    BatchEntry, GenerationOptions, ParameterValidator, ProviderDescriptor, ProviderFamily,
    ProviderRegistry, ProviderUpdate, RateLimitQuota, StabilityOptions,
};
use imagegen_engine::imaging::{calculate_hash, get_image_info, resize_image, save_result_images};
use imagegen_engine::{ImageGenerator, RetryMode};
use serde_json::{json, Map, Value};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "IMAGEGEN_LOG";
/// Progress lines from this binary, warnings from everything else.
const DEFAULT_LOG_FILTER: &str = "warn,imagegen=info";

#[derive(Debug, Parser)]
#[command(name = "imagegen", version, about = "Multi-provider image generation client")]
struct Cli {
    /// Provider config file (YAML).
    #[arg(long, global = true, env = "IMAGEGEN_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Append generation events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List configured providers and whether a credential is present.
    Providers,
    /// Print one provider's descriptor.
    Show { provider: String },
    /// Check a prompt and options against a provider without calling it.
    Validate(ValidateArgs),
    Generate(GenerateArgs),
    /// One generation per prompt, sequentially.
    Batch(BatchArgs),
    /// Same prompt against every available provider.
    Compare(CompareArgs),
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Format, size and hash of a local image, optionally writing a thumbnail.
    ImageInfo(ImageInfoArgs),
}

#[derive(Debug, Args)]
struct ValidateArgs {
    #[arg(long)]
    provider: String,
    #[arg(long)]
    prompt: String,
    #[command(flatten)]
    options: OptionArgs,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long)]
    provider: String,
    #[arg(long)]
    prompt: String,
    #[command(flatten)]
    options: OptionArgs,
    /// Save the returned images here.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct BatchArgs {
    #[arg(long)]
    provider: String,
    /// May be repeated.
    #[arg(long = "prompt")]
    prompts: Vec<String>,
    /// File with one prompt per line.
    #[arg(long)]
    prompts_file: Option<PathBuf>,
    #[command(flatten)]
    options: OptionArgs,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CompareArgs {
    #[arg(long)]
    prompt: String,
    #[command(flatten)]
    options: OptionArgs,
}

#[derive(Debug, Args)]
struct OptionArgs {
    #[arg(long)]
    size: Option<String>,
    #[arg(long)]
    quality: Option<String>,
    #[arg(long)]
    style: Option<String>,
    #[arg(short, long)]
    n: Option<u32>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    max_retries: Option<u32>,
    #[arg(long)]
    cfg_scale: Option<f64>,
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Do not retry failures that cannot succeed on a later attempt.
    #[arg(long)]
    transient_only: bool,
}

impl OptionArgs {
    fn to_options(&self) -> GenerationOptions {
        GenerationOptions {
            size: self.size.clone(),
            quality: self.quality.clone(),
            style: self.style.clone(),
            n: self.n,
            model: self.model.clone(),
            max_retries: self.max_retries,
            stability: StabilityOptions {
                cfg_scale: self.cfg_scale,
                steps: self.steps,
                width: self.width,
                height: self.height,
            },
        }
    }

    fn retry_mode(&self) -> RetryMode {
        if self.transient_only {
            RetryMode::TransientOnly
        } else {
            RetryMode::All
        }
    }
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Add or replace a provider and save the config file.
    Add {
        provider: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        endpoint: String,
        #[command(flatten)]
        fields: DescriptorArgs,
    },
    /// Remove a provider and save the config file.
    Remove { provider: String },
    /// Change selected fields of a provider and save the config file.
    Update {
        provider: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        endpoint: Option<String>,
        #[command(flatten)]
        fields: DescriptorArgs,
    },
}

#[derive(Debug, Args)]
struct DescriptorArgs {
    #[arg(long, value_delimiter = ',')]
    sizes: Option<Vec<String>>,
    #[arg(long, value_delimiter = ',')]
    qualities: Option<Vec<String>>,
    #[arg(long, value_delimiter = ',')]
    styles: Option<Vec<String>>,
    #[arg(long)]
    requests_per_minute: Option<u32>,
    #[arg(long)]
    tokens_per_minute: Option<u32>,
    #[arg(long)]
    api_key_env: Option<String>,
    /// Wire format: jimeng, openai or stability.
    #[arg(long, value_parser = parse_family)]
    family: Option<ProviderFamily>,
}

#[derive(Debug, Args)]
struct ImageInfoArgs {
    path: PathBuf,
    /// Maximum thumbnail bounds, e.g. 256x256.
    #[arg(long, requires = "out")]
    thumbnail: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("imagegen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing();

    let registry = ProviderRegistry::load(&cli.config);
    match cli.command {
        Command::Providers => run_providers(&registry),
        Command::Show { provider } => run_show(&registry, &provider),
        Command::Validate(args) => run_validate(&registry, args),
        Command::Generate(args) => {
            let mut generator = build_generator(registry, cli.events, args.options.retry_mode())?;
            run_generate(&mut generator, args)
        }
        Command::Batch(args) => {
            let mut generator = build_generator(registry, cli.events, args.options.retry_mode())?;
            run_batch(&mut generator, args)
        }
        Command::Compare(args) => {
            let mut generator = build_generator(registry, cli.events, args.options.retry_mode())?;
            run_compare(&mut generator, args)
        }
        Command::Config(command) => run_config(registry, command),
        Command::ImageInfo(args) => run_image_info(args),
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn build_generator(
    registry: ProviderRegistry,
    events: Option<PathBuf>,
    mode: RetryMode,
) -> Result<ImageGenerator> {
    let generator = ImageGenerator::new(registry)
        .context("failed to build provider clients")?
        .with_retry_mode(mode);
    Ok(match events {
        Some(path) => generator
            .with_event_log(&path)
            .with_context(|| format!("failed opening event log {}", path.display()))?,
        None => generator,
    })
}

fn run_providers(registry: &ProviderRegistry) -> Result<i32> {
    let available = registry.get_available_providers();
    for (id, descriptor) in registry.get_all_providers() {
        let status = if available.contains(id) {
            "available".to_string()
        } else {
            format!(
                "missing {}",
                registry.credential_env(id).unwrap_or_else(|| "credential".to_string())
            )
        };
        println!("{id}\t{}\t{status}", descriptor.name);
    }
    Ok(0)
}

fn run_show(registry: &ProviderRegistry, provider: &str) -> Result<i32> {
    let descriptor = registry.get_provider_config(provider)?;
    let mut out = map_object(serde_json::to_value(descriptor)?);
    out.insert("id".to_string(), Value::String(provider.to_string()));
    out.insert(
        "available".to_string(),
        Value::Bool(registry.get_available_providers().iter().any(|id| id == provider)),
    );
    print_json(&Value::Object(out))?;
    Ok(0)
}

fn run_validate(registry: &ProviderRegistry, args: ValidateArgs) -> Result<i32> {
    let report = ParameterValidator::new(registry).validate_request(
        &args.provider,
        &args.prompt,
        &args.options.to_options(),
    )?;
    print_json(&serde_json::to_value(&report)?)?;
    Ok(if report.valid { 0 } else { 2 })
}

fn run_generate(generator: &mut ImageGenerator, args: GenerateArgs) -> Result<i32> {
    let result = generator.generate(&args.provider, &args.prompt, &args.options.to_options())?;
    print_json(&serde_json::to_value(&result)?)?;
    if let Some(out) = args.out.as_deref() {
        for path in save_result_images(&result, out, &args.provider)? {
            tracing::info!(path = %path.display(), "saved image");
        }
    }
    Ok(if result.success { 0 } else { 1 })
}

fn run_batch(generator: &mut ImageGenerator, args: BatchArgs) -> Result<i32> {
    let mut prompts = args.prompts.clone();
    if let Some(path) = args.prompts_file.as_deref() {
        prompts.extend(read_prompts(path)?);
    }
    if prompts.is_empty() {
        bail!("no prompts given; use --prompt or --prompts-file");
    }

    let entries = generator.batch_generate(&args.provider, &prompts, &args.options.to_options());
    print_json(&serde_json::to_value(&entries)?)?;

    if let Some(out) = args.out.as_deref() {
        for (idx, entry) in entries.iter().enumerate() {
            if let BatchEntry::Generated(result) = entry {
                let stem = format!("{}-{:03}", args.provider, idx + 1);
                for path in save_result_images(result, out, &stem)? {
                    tracing::info!(path = %path.display(), "saved image");
                }
            }
        }
    }

    let failed = entries.iter().filter(|entry| !entry.is_success()).count();
    if failed > 0 {
        tracing::warn!(failed, total = entries.len(), "some prompts failed");
        return Ok(1);
    }
    Ok(0)
}

fn run_compare(generator: &mut ImageGenerator, args: CompareArgs) -> Result<i32> {
    let available = generator.available_providers();
    if available.is_empty() {
        bail!("no providers available; set at least one provider API key");
    }
    let mut out = Map::new();
    for (provider, result) in generator.compare(&args.prompt, &args.options.to_options()) {
        out.insert(provider, serde_json::to_value(&result)?);
    }
    print_json(&Value::Object(out))?;
    Ok(0)
}

fn run_config(mut registry: ProviderRegistry, command: ConfigCommand) -> Result<i32> {
    let path = registry
        .store_path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    match command {
        ConfigCommand::Add {
            provider,
            name,
            endpoint,
            fields,
        } => {
            let rate_limit = RateLimitQuota {
                requests_per_minute: fields
                    .requests_per_minute
                    .unwrap_or(RateLimitQuota::default().requests_per_minute),
                tokens_per_minute: fields.tokens_per_minute.unwrap_or_default(),
            };
            let descriptor = ProviderDescriptor {
                name,
                endpoint,
                required_params: vec!["prompt".to_string()],
                supported_sizes: fields.sizes.unwrap_or_default(),
                supported_qualities: fields.qualities.unwrap_or_default(),
                supported_styles: fields.styles.unwrap_or_default(),
                rate_limit,
                api_key_env: fields.api_key_env,
                family: fields.family,
            };
            registry.add_provider(provider.clone(), descriptor)?;
            tracing::info!(provider = %provider, path = %path.display(), "added provider");
        }
        ConfigCommand::Remove { provider } => match registry.remove_provider(&provider)? {
            Some(_) => {
                tracing::info!(provider = %provider, path = %path.display(), "removed provider")
            }
            None => {
                tracing::warn!(provider = %provider, "provider is not configured; nothing to remove")
            }
        },
        ConfigCommand::Update {
            provider,
            name,
            endpoint,
            fields,
        } => {
            let current = registry.get_rate_limit_info(&provider)?;
            let rate_limit =
                if fields.requests_per_minute.is_some() || fields.tokens_per_minute.is_some() {
                    Some(RateLimitQuota {
                        requests_per_minute: fields
                            .requests_per_minute
                            .unwrap_or(current.requests_per_minute),
                        tokens_per_minute: fields
                            .tokens_per_minute
                            .unwrap_or(current.tokens_per_minute),
                    })
                } else {
                    None
                };
            let update = ProviderUpdate {
                name,
                endpoint,
                required_params: None,
                supported_sizes: fields.sizes,
                supported_qualities: fields.qualities,
                supported_styles: fields.styles,
                rate_limit,
                api_key_env: fields.api_key_env,
                family: fields.family,
            };
            registry.update_provider(&provider, update)?;
            tracing::info!(provider = %provider, path = %path.display(), "updated provider");
        }
    }
    Ok(0)
}

fn run_image_info(args: ImageInfoArgs) -> Result<i32> {
    let data =
        fs::read(&args.path).with_context(|| format!("failed reading {}", args.path.display()))?;
    let info = get_image_info(&data)
        .with_context(|| format!("{} is not a readable image", args.path.display()))?;
    let mut out = map_object(serde_json::to_value(&info)?);
    out.insert("bytes".to_string(), json!(data.len()));
    out.insert("sha256".to_string(), Value::String(calculate_hash(&data)));

    if let (Some(bounds), Some(target)) = (args.thumbnail.as_deref(), args.out.as_deref()) {
        let Some((width, height)) = imagegen_contracts::request::parse_size(bounds) else {
            bail!("thumbnail bounds must look like WIDTHxHEIGHT, got {bounds}");
        };
        let resized = resize_image(&data, width, height)?;
        fs::write(target, &resized)
            .with_context(|| format!("failed writing {}", target.display()))?;
        out.insert(
            "thumbnail".to_string(),
            Value::String(target.to_string_lossy().to_string()),
        );
    }
    print_json(&Value::Object(out))?;
    Ok(0)
}

fn read_prompts(path: &Path) -> Result<Vec<String>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn parse_family(value: &str) -> Result<ProviderFamily, String> {
    ProviderFamily::from_id(value)
        .ok_or_else(|| format!("unknown family '{value}', expected jimeng, openai or stability"))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::Parser;

    use super::*;

    #[test]
    fn generate_flags_map_to_typed_options() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "imagegen",
            "generate",
            "--provider",
            "stability",
            "--prompt",
            "A mountain",
            "--size",
            "768x512",
            "--steps",
            "30",
            "-n",
            "2",
            "--transient-only",
        ])?;
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        let options = args.options.to_options();
        assert_eq!(options.size.as_deref(), Some("768x512"));
        assert_eq!(options.n, Some(2));
        assert_eq!(options.stability.steps, Some(30));
        assert_eq!(args.options.retry_mode(), RetryMode::TransientOnly);
        Ok(())
    }

    #[test]
    fn config_path_defaults_to_references_file() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["imagegen", "providers"])?;
        if std::env::var_os("IMAGEGEN_CONFIG").is_none() {
            assert_eq!(cli.config, PathBuf::from("references/provider_configs.yaml"));
        }
        Ok(())
    }

    #[test]
    fn config_add_then_update_persists_to_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("providers.yaml");

        let cli = Cli::try_parse_from([
            "imagegen",
            "--config",
            path.to_str().unwrap_or_default(),
            "config",
            "add",
            "mirror",
            "--name",
            "DALL-E mirror",
            "--endpoint",
            "https://mirror.local/v1/images/generations",
            "--sizes",
            "1024x1024,512x512",
            "--family",
            "openai",
            "--api-key-env",
            "MIRROR_KEY",
        ])?;
        let Command::Config(command) = cli.command else {
            panic!("expected config");
        };
        assert_eq!(run_config(ProviderRegistry::load(&cli.config), command)?, 0);

        let cli = Cli::try_parse_from([
            "imagegen",
            "--config",
            path.to_str().unwrap_or_default(),
            "config",
            "update",
            "mirror",
            "--requests-per-minute",
            "5",
        ])?;
        let Command::Config(command) = cli.command else {
            panic!("expected config");
        };
        run_config(ProviderRegistry::load(&cli.config), command)?;

        let registry = ProviderRegistry::load(&path);
        let descriptor = registry.get_provider_config("mirror")?;
        assert_eq!(descriptor.family, Some(ProviderFamily::OpenAi));
        assert_eq!(descriptor.supported_sizes, vec!["1024x1024", "512x512"]);
        assert_eq!(descriptor.rate_limit.requests_per_minute, 5);
        assert_eq!(registry.credential_env("mirror").as_deref(), Some("MIRROR_KEY"));
        assert!(fs::read_to_string(&path)?.contains("mirror"));
        Ok(())
    }

    #[test]
    fn default_log_filter_parses() -> anyhow::Result<()> {
        EnvFilter::try_new(DEFAULT_LOG_FILTER)?;
        Ok(())
    }

    #[test]
    fn unopenable_event_log_fails_generator_setup() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "x")?;
        let err = build_generator(
            ProviderRegistry::with_defaults(),
            Some(blocker.join("events.jsonl")),
            RetryMode::default(),
        )
        .err()
        .map(|err| err.to_string())
        .unwrap_or_default();
        assert!(err.starts_with("failed opening event log"), "{err}");
        Ok(())
    }

    #[test]
    fn unknown_family_is_rejected_by_the_parser() {
        let parsed = Cli::try_parse_from([
            "imagegen",
            "config",
            "update",
            "openai",
            "--family",
            "midjourney",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn prompts_file_skips_blank_and_comment_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("prompts.txt");
        fs::write(&path, "A cute cat\n\n# skipped\n  A sunset  \n")?;
        assert_eq!(read_prompts(&path)?, vec!["A cute cat", "A sunset"]);
        Ok(())
    }
}
