use anyhow::{anyhow, bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use custom_llm_rs::config::DEFAULT_ENV_PREFIX;
use custom_llm_rs::{
    ContentGenerator, EnvLoader, GenerateContentRequest, ModelClient, OnAlternateFailure,
    OpenAiCompatibleProvider, ProviderConfig, ProviderId, RequestId,
};
use futures::StreamExt;
use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_PROVIDER_PREFIX: &str = "OPENAI";

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    custom_llm_rs::init_logging();

    let matches = Command::new("custom-llm-rs")
        .version("0.1.0")
        .about("Content generation against OpenAI-compatible endpoints")
        .subcommand_required(true)
        .subcommand(
            Command::new("check")
                .about("Validate a provider configuration from the environment")
                .arg(
                    Arg::new("prefix")
                        .long("prefix")
                        .value_name("PREFIX")
                        .help("Environment variable prefix")
                        .default_value(DEFAULT_ENV_PREFIX)
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("generate")
                .about("Send a GenerateContentRequest JSON file and print the reply")
                .arg(
                    Arg::new("request-file")
                        .long("request-file")
                        .value_name("FILE")
                        .help("JSON file containing the request")
                        .required(true)
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("stream")
                        .long("stream")
                        .help("Enable streaming output")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("alternate-prefix")
                        .long("alternate-prefix")
                        .value_name("PREFIX")
                        .help("Prefix of the alternate provider's variables")
                        .default_value(DEFAULT_ENV_PREFIX)
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("default-prefix")
                        .long("default-prefix")
                        .value_name("PREFIX")
                        .help("Prefix of the default provider's variables")
                        .default_value(DEFAULT_PROVIDER_PREFIX)
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("on-alternate-failure")
                        .long("on-alternate-failure")
                        .value_name("POLICY")
                        .help("fail-fast or fallback; required when the alternate is configured")
                        .value_parser(value_parser!(OnAlternateFailure))
                        .action(ArgAction::Set),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("check", args)) => check(args),
        Some(("generate", args)) => generate(args).await.map(|_| ExitCode::SUCCESS),
        _ => bail!("unknown subcommand"),
    }
}

fn prefix<'a>(args: &'a ArgMatches, name: &str) -> &'a str {
    args.get_one::<String>(name)
        .map(String::as_str)
        .unwrap_or(DEFAULT_ENV_PREFIX)
}

fn check(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let loader = EnvLoader::new(prefix(args, "prefix"));
    let validation = loader.validate();
    if !validation.is_valid {
        for error in &validation.errors {
            eprintln!("{}", error);
        }
        return Ok(ExitCode::FAILURE);
    }

    let config = loader
        .load()?
        .ok_or_else(|| anyhow!("{} provider is not configured", loader.prefix()))?;
    println!("{:#?}", config);
    Ok(ExitCode::SUCCESS)
}

fn load_config(prefix: &str) -> anyhow::Result<Option<ProviderConfig>> {
    EnvLoader::new(prefix)
        .load()
        .with_context(|| format!("invalid {} configuration", prefix))
}

async fn generate(args: &ArgMatches) -> anyhow::Result<()> {
    let request_file: &String = args
        .get_one("request-file")
        .ok_or_else(|| anyhow!("--request-file is required"))?;
    let request: GenerateContentRequest = serde_json::from_str(
        &fs::read_to_string(request_file)
            .with_context(|| format!("failed to read {}", request_file))?,
    )
    .with_context(|| format!("{} is not a GenerateContentRequest", request_file))?;

    let default_prefix = prefix(args, "default-prefix");
    let default_config = load_config(default_prefix)?.ok_or_else(|| {
        anyhow!(
            "{p}_API_KEY, {p}_ENDPOINT and {p}_MODEL_NAME must be set for the default provider",
            p = default_prefix
        )
    })?;
    let default: Arc<dyn ContentGenerator> = Arc::new(
        OpenAiCompatibleProvider::new(Arc::new(default_config))
            .with_id(ProviderId::new(ProviderId::DEFAULT)),
    );

    let alternate_prefix = prefix(args, "alternate-prefix");
    let client = match load_config(alternate_prefix)? {
        Some(config) => {
            let on_failure = args
                .get_one::<OnAlternateFailure>("on-alternate-failure")
                .copied()
                .ok_or_else(|| {
                    anyhow!(
                        "{} provider is configured; pass --on-alternate-failure fail-fast|fallback",
                        alternate_prefix
                    )
                })?;
            let alternate = Arc::new(OpenAiCompatibleProvider::new(Arc::new(config)));
            ModelClient::with_alternate(default, alternate, on_failure)
        }
        None => ModelClient::default_only(default),
    };

    let request_id = RequestId::new();
    debug!(request_id = %request_id, provider = %client.id(), "dispatching request");

    if args.get_flag("stream") {
        let mut stream = client.generate_content_stream(&request, &request_id).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("stream failed")?;
            let output = serde_json::json!({
                "content": chunk.text,
                "role": "model",
                "finishReason": chunk.finish_reason(),
            });
            println!("{}", serde_json::to_string(&output)?);
            io::stdout().flush()?;
        }
    } else {
        let response = client.generate_content(&request, &request_id).await?;
        let output = serde_json::json!({
            "content": response.text,
            "role": "model",
            "functionCalls": response.function_calls,
            "usage": response.usage,
        });
        println!("{}", serde_json::to_string(&output)?);
    }

    Ok(())
}
