use clap::{ArgAction, Parser};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "routehound",
    version,
    about = "rate-limited API endpoint discovery",
    long_about = "Routehound probes a base URL with a wordlist of API routes, retries transient failures, and reports working endpoints and header-based access-control bypasses.\n\nExamples:\n  routehound -u https://target.tld/api -w apiroutes.txt\n  routehound -u https://target.tld/api --rate-limit 2 -t 4 --mutate-headers\n  routehound -u https://target.tld/api --token abc123 -o found.json\n\nTip: Use --config to persist scan settings and keep CLI invocations short."
)]
pub struct CliArgs {
    #[arg(
        short = 'u',
        long = "url",
        value_name = "URL",
        help_heading = "Input",
        help = "Base URL of the API to scan."
    )]
    pub url: Option<String>,

    #[arg(
        short = 'w',
        long = "wordlist",
        value_name = "FILE",
        help_heading = "Input",
        help = "Wordlist of candidate routes, one per line (default apiroutes.txt)."
    )]
    pub wordlist: Option<String>,

    #[arg(
        short = 'C',
        long = "config",
        visible_alias = "cfg",
        value_name = "FILE",
        help_heading = "Input",
        help = "Path to config file (defaults to ~/.routehound/config.yml)."
    )]
    pub config: Option<String>,

    #[arg(
        short = 'X',
        long = "method",
        value_name = "METHOD",
        help_heading = "HTTP",
        help = "HTTP method: GET, POST, PUT, DELETE, PATCH, HEAD, OPTIONS (default GET)."
    )]
    pub method: Option<String>,

    #[arg(
        long = "timeout",
        value_name = "SECONDS",
        help_heading = "HTTP",
        help = "Per-request timeout in seconds (default 3)."
    )]
    pub timeout: Option<u64>,

    #[arg(
        short = 'H',
        long = "header",
        value_name = "HEADER",
        action = ArgAction::Append,
        help_heading = "HTTP",
        help = "Extra request header 'Key: Value' (repeatable)."
    )]
    pub header: Vec<String>,

    #[arg(
        long = "proxy",
        value_name = "URL",
        help_heading = "HTTP",
        help = "Send requests through this proxy."
    )]
    pub proxy: Option<String>,

    #[arg(
        long = "user-agent",
        visible_alias = "ua",
        value_name = "UA",
        help_heading = "HTTP",
        help = "Fixed User-Agent header."
    )]
    pub user_agent: Option<String>,

    #[arg(
        long = "random-agent",
        help_heading = "HTTP",
        help = "Pick a random User-Agent and Referer per request."
    )]
    pub random_agent: bool,

    #[arg(
        long = "token",
        value_name = "TOKEN",
        help_heading = "Auth",
        help = "Send 'Authorization: <token-type> <token>'."
    )]
    pub token: Option<String>,

    #[arg(
        long = "token-type",
        value_name = "TYPE",
        help_heading = "Auth",
        help = "Authorization scheme for --token (default Bearer)."
    )]
    pub token_type: Option<String>,

    #[arg(
        long = "api-key",
        value_name = "KEY",
        help_heading = "Auth",
        help = "Send 'X-API-Key: <key>'."
    )]
    pub api_key: Option<String>,

    #[arg(
        long = "mutate-headers",
        visible_alias = "bypass",
        help_heading = "Bypass",
        help = "Re-probe each route with spoofed source/rewrite headers."
    )]
    pub mutate_headers: bool,

    #[arg(
        short = 't',
        long = "threads",
        visible_alias = "concurrency",
        value_name = "N",
        help_heading = "Performance",
        help = "Number of concurrent workers (default 10)."
    )]
    pub threads: Option<usize>,

    #[arg(
        long = "rate-limit",
        visible_alias = "rate",
        value_name = "RPS",
        help_heading = "Performance",
        help = "Maximum requests per second across all workers (default 5)."
    )]
    pub rate_limit: Option<f64>,

    #[arg(
        long = "retries",
        value_name = "N",
        help_heading = "Performance",
        help = "Attempts per request including the first (default 3)."
    )]
    pub retries: Option<u32>,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "FILE",
        help_heading = "Output",
        help = "Write findings to a file."
    )]
    pub output: Option<String>,

    #[arg(
        long = "format",
        visible_alias = "output-format",
        value_name = "FORMAT",
        help_heading = "Output",
        help = "Output file format: text or json (inferred from the extension)."
    )]
    pub output_format: Option<String>,

    #[arg(
        long = "no-progress",
        help_heading = "Output",
        help = "Hide the progress bar."
    )]
    pub no_progress: bool,

    #[arg(
        long = "no-color",
        help_heading = "Output",
        help = "Disable colored output."
    )]
    pub no_color: bool,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        conflicts_with = "quiet",
        help_heading = "Output",
        help = "Increase log verbosity (-v debug, -vv trace)."
    )]
    pub verbose: u8,

    #[arg(
        short = 'q',
        long = "quiet",
        help_heading = "Output",
        help = "Only log warnings and errors."
    )]
    pub quiet: bool,
}
