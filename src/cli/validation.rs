use crate::cli::args::CliArgs;

pub fn validate(args: &CliArgs) -> Result<(), String> {
    if let Some(rate) = args.rate_limit {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(format!("invalid --rate-limit '{rate}', expected a positive number"));
        }
    }
    if let Some(threads) = args.threads {
        if threads == 0 {
            return Err("invalid --threads, expected positive integer".to_string());
        }
    }
    if let Some(timeout) = args.timeout {
        if timeout == 0 {
            return Err("invalid --timeout, expected positive integer".to_string());
        }
    }
    if let Some(retries) = args.retries {
        if retries == 0 || retries > crate::runner::MAX_ATTEMPTS_LIMIT {
            return Err(format!(
                "invalid --retries '{retries}', expected 1..={}",
                crate::runner::MAX_ATTEMPTS_LIMIT
            ));
        }
    }
    if let Some(raw) = args.method.as_deref() {
        crate::dispatch::parse_method(raw).map_err(|e| format!("invalid --method: {e}"))?;
    }
    if let Some(raw) = args.output_format.as_deref() {
        crate::output::OutputFormat::parse(raw).map_err(|e| format!("invalid --format: {e}"))?;
    }
    for raw in args.header.iter() {
        crate::headers::parse_header_line(raw).map_err(|e| format!("invalid --header: {e}"))?;
    }
    Ok(())
}
