use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "kernelq", about = "Run Python on a remote Jupyter kernel and print typed columns", version)]
pub struct Cli {
    /// Python to execute for its side effects (or pipe it via stdin).
    #[arg(value_name = "CODE")]
    pub code: Option<String>,

    /// Expression yielding the result dict (column name -> list of values).
    #[arg(long, value_name = "EXPR")]
    pub result: String,

    /// Expression naming the list of time-valued columns.
    ///
    /// When the name is not bound on the kernel, no column is treated as a
    /// timestamp.
    #[arg(long = "time-names", value_name = "EXPR", default_value = "tcols")]
    pub time_names: String,

    /// Control-plane base URL (overrides KERNELQ_BASE_URL).
    #[arg(long = "base-url")]
    pub base_url: Option<String>,

    /// API token (overrides KERNELQ_TOKEN).
    #[arg(long)]
    pub token: Option<String>,

    /// Seconds to wait for each kernel reply; 0 waits forever.
    #[arg(long = "execute-timeout")]
    pub execute_timeout: Option<u64>,

    /// Print columns as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
