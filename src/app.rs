use std::io::{self, Write};
use std::time::Duration;

use clap::{error::ErrorKind, CommandFactory, Parser};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};

use crate::aggregator::{Outcome, Resolved};
use crate::cli::args::CliArgs;
use crate::cli::validation;
use crate::config::{self, ConfigFile};
use crate::context::RunContext;
use crate::output::{self, OutputFormat};
use crate::runner::{self, Options, Runner, ScanResult, WordlistSource};

fn print_banner() {
    const BANNER: &str = r#"
                    __       __                          __
   _________  __  _/ /____  / /_  ____  __  ______  ____/ /
  / ___/ __ \/ / / / __/ _ \/ __ \/ __ \/ / / / __ \/ __  /
 / /  / /_/ / /_/ / /_/  __/ / / / /_/ / /_/ / / / / /_/ /
/_/   \____/\__,_/\__/\___/_/ /_/\____/\__,_/_/ /_/\__,_/
    "#;
    print!("{}", BANNER);
    println!();
}

fn format_kv_line(label: &str, value: &str) {
    println!(":: {:<10}: {}", label, value);
}

fn format_bool(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

#[derive(Debug)]
struct RunConfig {
    options: Options,
    wordlist_path: String,
    output_path: Option<String>,
    output_format: OutputFormat,
    no_progress: bool,
    no_color: bool,
    verbose: u8,
    quiet: bool,
    workers: usize,
}

fn build_run_config(args: CliArgs, cfg: ConfigFile) -> Result<RunConfig, String> {
    validation::validate(&args)?;

    let url = args
        .url
        .or(cfg.url)
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| "missing target URL, pass -u/--url or set 'url' in the config".to_string())?;
    let wordlist_path = args
        .wordlist
        .or(cfg.wordlist)
        .unwrap_or_else(|| runner::DEFAULT_WORDLIST.to_string());

    let method = args.method.or(cfg.method).unwrap_or_else(|| "GET".to_string());
    let timeout = args
        .timeout
        .or(cfg.timeout)
        .unwrap_or(runner::DEFAULT_TIMEOUT_SECS);
    let threads = args
        .threads
        .or(cfg.threads)
        .unwrap_or(crate::dispatch::DEFAULT_CONCURRENCY);
    let rate = args
        .rate_limit
        .or(cfg.rate_limit)
        .unwrap_or(crate::limiter::DEFAULT_RATE);
    let retries = args
        .retries
        .or(cfg.retries)
        .unwrap_or(crate::executor::DEFAULT_MAX_ATTEMPTS);

    // config headers first so a CLI header with the same name wins
    let mut headers = cfg.headers.unwrap_or_default();
    headers.extend(args.header);

    let output_path = args.output.or(cfg.output);
    let output_format = match args.output_format.or(cfg.output_format) {
        Some(raw) => OutputFormat::parse(&raw).map_err(|e| e.to_string())?,
        None => output_path
            .as_deref()
            .and_then(output::infer_format_from_path)
            .unwrap_or(OutputFormat::Text),
    };

    let options = Options {
        url,
        wordlist: WordlistSource::FilePath(wordlist_path.clone()),
        method,
        timeout_seconds: timeout,
        concurrency: threads,
        rate,
        max_attempts: retries,
        token: args.token.or(cfg.token),
        token_type: args.token_type.or(cfg.token_type),
        api_key: args.api_key.or(cfg.api_key),
        headers,
        mutate_headers: args.mutate_headers || cfg.mutate_headers.unwrap_or(false),
        random_agent: args.random_agent || cfg.random_agent.unwrap_or(false),
        user_agent: args.user_agent.or(cfg.user_agent),
        proxy: args.proxy.or(cfg.proxy).filter(|p| !p.trim().is_empty()),
        ..Options::default()
    };

    Ok(RunConfig {
        workers: threads.clamp(1, 16),
        options,
        wordlist_path,
        output_path,
        output_format,
        no_progress: args.no_progress || cfg.no_progress.unwrap_or(false),
        no_color: args.no_color || cfg.no_color.unwrap_or(false),
        verbose: args.verbose,
        quiet: args.quiet,
    })
}

fn log_level(verbose: u8, quiet: bool) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    }
}

fn init_logging(run: &RunConfig) {
    use tracing_subscriber::EnvFilter;

    let level = log_level(run.verbose, run.quiet);
    // keep the HTTP stack quiet unless RUST_LOG asks for it
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(format!("routehound={level},reqwest=warn,hyper=warn"))
            .unwrap_or_else(|_| EnvFilter::new(level))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(!run.no_color)
        .with_target(false)
        .try_init();
}

fn render_resolved(resolved: &Resolved) -> Option<String> {
    let finding = resolved.finding()?;
    let records = output::build_records(std::slice::from_ref(&finding));
    let block = output::format_record(records.first()?);
    let block = block.trim_end();
    Some(match resolved.outcome {
        Outcome::Bypass { .. } => block.yellow().bold().to_string(),
        _ => block.green().to_string(),
    })
}

// a hidden bar (--no-progress, -q, stderr not a tty) drops println, so write directly
fn print_resolved<W: Write>(pb: &ProgressBar, out: &mut W, resolved: &Resolved) {
    let Some(block) = render_resolved(resolved) else {
        return;
    };
    if pb.is_hidden() {
        let _ = writeln!(out, "{block}");
    } else {
        pb.suspend(|| {
            let _ = writeln!(out, "{block}");
        });
    }
}

fn print_summary(result: &ScanResult) {
    let s = &result.summary;
    println!();
    format_kv_line("Checked", &format!("{}/{}", s.checked, result.total_candidates));
    format_kv_line("Working", &s.working.to_string().green().to_string());
    format_kv_line("Bypass", &s.bypass.to_string().yellow().to_string());
    format_kv_line("Failed", &s.failed.to_string().red().to_string());
    format_kv_line(
        "Skipped",
        &format!("{} (not found {}, unsafe {})", s.not_found + s.unsafe_entries, s.not_found, s.unsafe_entries),
    );
}

async fn write_output(path: &str, format: OutputFormat, result: &ScanResult) -> Result<(), String> {
    let records = output::build_records(&result.findings);
    let rendered = output::render(&records, format);

    let mut outfile = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|e| format!("failed to open output file: {e}"))?;
    outfile
        .write_all(&rendered)
        .await
        .map_err(|_| "failed to write output file".to_string())?;
    Ok(())
}

async fn run_async(run: RunConfig) -> Result<(), String> {
    if run.no_color {
        colored::control::set_override(false);
    }
    let context = RunContext::new();

    print_banner();
    println!("{}", context.header_line());
    println!();
    format_kv_line("Target", &run.options.url);
    format_kv_line("Wordlist", &run.wordlist_path);
    format_kv_line("Method", &run.options.method.to_uppercase());
    format_kv_line("Threads", &run.options.concurrency.to_string());
    format_kv_line("Rate", &format!("{} req/s", run.options.rate));
    format_kv_line("Timeout", &format!("{}s", run.options.timeout_seconds));
    format_kv_line("Retries", &run.options.max_attempts.to_string());
    format_kv_line("Mutation", format_bool(run.options.mutate_headers));
    if let Some(proxy) = run.options.proxy.as_deref() {
        format_kv_line("Proxy", proxy);
    }
    if let Some(path) = run.output_path.as_deref() {
        format_kv_line("Output", path);
    }
    println!();

    let runner = Runner::with_context(run.options, context).map_err(|e| e.to_string())?;
    let candidates = runner.load_candidates().await.map_err(|e| e.to_string())?;

    let pb = ProgressBar::new(candidates.len() as u64);
    if run.no_progress || run.quiet {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_draw_target(ProgressDrawTarget::stderr());
        pb.enable_steady_tick(Duration::from_millis(200));
    }
    pb.set_style(
        ProgressStyle::with_template(
            ":: Progress: [{pos}/{len}] :: {per_sec} :: Duration: [{elapsed_precise}] :: {msg}",
        )
        .map_err(|e| format!("failed to build progress bar style: {e}"))?
        .progress_chars(r#"#>-"#),
    );

    let cancel = runner.cancel_token();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        let pb = pb.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                pb.set_message("cancelling");
                warn!("interrupted, finishing in-flight requests");
                cancel.cancel();
            }
        }
    });

    let result = runner
        .run_candidates(candidates, |resolved| {
            pb.inc(1);
            if matches!(resolved.outcome, Outcome::Bypass { .. }) {
                pb.set_message(format!("bypass: {}", resolved.candidate));
            }
            print_resolved(&pb, &mut io::stdout(), resolved);
        })
        .await;
    interrupt.abort();
    pb.finish_and_clear();
    let result = result.map_err(|e| e.to_string())?;

    if result.cancelled {
        println!("{}", ":: Scan interrupted, showing partial results ::".yellow());
    }
    print_summary(&result);

    if let Some(path) = run.output_path.as_deref() {
        match write_output(path, run.output_format, &result).await {
            Ok(()) => format_kv_line("Saved", path),
            Err(e) => error!("{e}"),
        }
    }

    println!();
    println!(
        ":: Completed :: scan took {}s ::",
        result.elapsed.as_secs()
    );

    Ok(())
}

pub fn run_cli() -> Result<(), String> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp => {
                let mut cmd = CliArgs::command();
                print!("{}", cmd.render_long_help());
                return Ok(());
            }
            ErrorKind::DisplayVersion => {
                let cmd = CliArgs::command();
                print!("{}", cmd.render_version());
                return Ok(());
            }
            _ => return Err(e.to_string()),
        },
    };

    let cfg = match args.config.as_deref() {
        Some(path) => config::load_config(&config::expand_tilde(path), false)?,
        None => match config::default_config_path() {
            Some(path) => config::load_config(&path, true)?,
            None => ConfigFile::default(),
        },
    };

    let run = build_run_config(args, cfg)?;
    init_logging(&run);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(run.workers)
        .build()
        .map_err(|e| format!("failed to build runtime: {e}"))?;

    rt.block_on(run_async(run))?;
    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_apply_without_config() {
        let args = CliArgs::parse_from(["routehound", "-u", "http://example.com/api"]);
        let run = build_run_config(args, ConfigFile::default()).unwrap();
        assert_eq!(run.wordlist_path, "apiroutes.txt");
        assert_eq!(run.options.method, "GET");
        assert_eq!(run.options.timeout_seconds, 3);
        assert_eq!(run.options.concurrency, 10);
        assert_eq!(run.options.rate, 5.0);
        assert_eq!(run.options.max_attempts, 3);
        assert_eq!(run.output_format, OutputFormat::Text);
        assert!(!run.options.mutate_headers);
    }

    #[test]
    fn cli_values_win_over_config() {
        let args = CliArgs::parse_from([
            "routehound",
            "-u",
            "http://cli.test/",
            "-t",
            "4",
            "-H",
            "X-Env: cli",
        ]);
        let cfg = ConfigFile {
            url: Some("http://cfg.test/".to_string()),
            threads: Some(20),
            rate_limit: Some(2.0),
            headers: Some(vec!["X-Env: cfg".to_string()]),
            mutate_headers: Some(true),
            ..ConfigFile::default()
        };
        let run = build_run_config(args, cfg).unwrap();
        assert_eq!(run.options.url, "http://cli.test/");
        assert_eq!(run.options.concurrency, 4);
        assert_eq!(run.options.rate, 2.0);
        assert!(run.options.mutate_headers);
        assert_eq!(run.options.headers, vec!["X-Env: cfg", "X-Env: cli"]);
    }

    #[test]
    fn missing_url_is_an_error() {
        let args = CliArgs::parse_from(["routehound"]);
        assert!(build_run_config(args, ConfigFile::default()).is_err());
    }

    #[test]
    fn output_format_is_inferred_from_extension() {
        let args = CliArgs::parse_from(["routehound", "-u", "http://e.test/", "-o", "found.json"]);
        let run = build_run_config(args, ConfigFile::default()).unwrap();
        assert_eq!(run.output_format, OutputFormat::Json);

        let args = CliArgs::parse_from([
            "routehound",
            "-u",
            "http://e.test/",
            "-o",
            "found.json",
            "--format",
            "text",
        ]);
        let run = build_run_config(args, ConfigFile::default()).unwrap();
        assert_eq!(run.output_format, OutputFormat::Text);
    }

    fn resolved(candidate: &str, outcome: Outcome) -> Resolved {
        Resolved {
            candidate: candidate.to_string(),
            url: Some(format!("http://e.test/api/{candidate}")),
            outcome,
        }
    }

    #[test]
    fn findings_print_when_progress_bar_is_hidden() {
        colored::control::set_override(false);
        let pb = ProgressBar::hidden();
        let mut out: Vec<u8> = Vec::new();

        print_resolved(
            &pb,
            &mut out,
            &resolved(
                "users",
                Outcome::Working {
                    status: 200,
                    body: crate::executor::ParsedBody::Raw("ok".to_string()),
                },
            ),
        );
        print_resolved(
            &pb,
            &mut out,
            &resolved(
                "admin",
                Outcome::Bypass {
                    header: crate::headers::MutationHeader {
                        name: "X-Forwarded-For".to_string(),
                        value: "127.0.0.1".to_string(),
                    },
                    baseline: crate::executor::AttemptResult::Working {
                        status: 403,
                        body: crate::executor::ParsedBody::Raw(String::new()),
                    },
                    status: 200,
                    body: crate::executor::ParsedBody::Raw("{}".to_string()),
                },
            ),
        );
        print_resolved(
            &pb,
            &mut out,
            &resolved(
                "ghost",
                Outcome::Skipped(crate::executor::SkipReason::NotFound),
            ),
        );

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("[+] Working endpoint: http://e.test/api/users"));
        assert!(text.contains("[+] Working endpoint: http://e.test/api/admin"));
        assert!(text.contains("Bypass header: X-Forwarded-For: 127.0.0.1"));
        assert!(!text.contains("ghost"));
    }

    #[test]
    fn verbosity_maps_to_level() {
        assert_eq!(log_level(0, false), "info");
        assert_eq!(log_level(1, false), "debug");
        assert_eq!(log_level(2, false), "trace");
        assert_eq!(log_level(0, true), "warn");
    }
}
