//! Embed a scan in another program.
//!
//! cargo run --example library_scan -- https://target.tld/api users,admin,health

use std::env;

use routehound::aggregator::Outcome;
use routehound::runner::{Options, Runner, WordlistSource};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let url = args
        .next()
        .ok_or("usage: library_scan <base-url> [comma-separated routes]")?;
    let routes = args
        .next()
        .unwrap_or_else(|| "users,admin,health,status".to_string());

    let runner = Runner::new(Options {
        url,
        wordlist: WordlistSource::Inline(routes.split(',').map(str::to_string).collect()),
        rate: 2.0,
        concurrency: 2,
        mutate_headers: true,
        ..Options::default()
    })?;

    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = runner
        .run_candidates(runner.load_candidates().await?, |resolved| {
            match &resolved.outcome {
                Outcome::Working { status, .. } => println!("{status} {}", resolved.candidate),
                Outcome::Bypass { header, status, .. } => println!(
                    "{status} {} (via {}: {})",
                    resolved.candidate, header.name, header.value
                ),
                _ => {}
            }
        })
        .await?;

    println!(
        "session {} checked {} found {} in {:?}",
        result.context.session_id,
        result.summary.checked,
        result.findings.len(),
        result.elapsed
    );
    Ok(())
}
