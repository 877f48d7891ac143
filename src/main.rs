mod cli;

use anyhow::{bail, Context, Result};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use std::io::{self, Read};
use std::time::Duration;

use kernelq::frame::{Column, ColumnValues};
use kernelq::{run_query, Config, QuerySpec};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = cli::Cli::parse();

    // Code comes from the positional argument, stdin, or both (stdin first,
    // argument appended).
    let mut code_from_stdin = String::new();
    if !io::stdin().is_terminal() {
        io::stdin().read_to_string(&mut code_from_stdin)?;
    }
    let arg_code = args.code.unwrap_or_default();
    let code = if !code_from_stdin.is_empty() && !arg_code.is_empty() {
        format!("{}\n{}", code_from_stdin.trim_end(), arg_code)
    } else if !code_from_stdin.is_empty() {
        code_from_stdin
    } else {
        arg_code
    };
    if code.trim().is_empty() {
        bail!("provide Python code as an argument or via stdin");
    }

    let cfg = Config::load();
    let mut settings = match (&args.base_url, cfg.connection_settings()) {
        // A --base-url flag can stand in for missing configuration.
        (Some(url), Err(_)) => {
            let mut s = kernelq::ConnectionSettings::new(url.clone(), "");
            if let Some(t) = cfg.get("KERNELQ_TOKEN") {
                s.token = t;
            }
            s
        }
        (_, settings) => settings?,
    };
    if let Some(url) = args.base_url {
        settings.base_url = url;
    }
    if let Some(token) = args.token {
        settings.token = token;
    }
    if let Some(secs) = args.execute_timeout {
        settings.execute_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }

    let spec = QuerySpec {
        code,
        result_code: args.result,
        time_names_code: args.time_names,
    };

    let columns = run_query(&settings, &spec)
        .await
        .context("query failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&columns_to_json(&columns))?);
    } else {
        print_table(&columns);
    }
    Ok(())
}

fn columns_to_json(columns: &[Column]) -> serde_json::Value {
    let mut out = serde_json::Map::new();
    for col in columns {
        let values = match &col.values {
            ColumnValues::Int(v) => serde_json::json!(v),
            ColumnValues::Float(v) => serde_json::json!(v),
            ColumnValues::Str(v) => serde_json::json!(v),
            ColumnValues::Time(v) => {
                serde_json::json!(v.iter().map(|t| t.to_rfc3339()).collect::<Vec<_>>())
            }
        };
        out.insert(col.name.clone(), values);
    }
    serde_json::Value::Object(out)
}

fn cell(col: &Column, row: usize) -> String {
    match &col.values {
        ColumnValues::Int(v) => v.get(row).map(|x| x.to_string()).unwrap_or_default(),
        ColumnValues::Float(v) => v.get(row).map(|x| x.to_string()).unwrap_or_default(),
        ColumnValues::Str(v) => v.get(row).cloned().unwrap_or_default(),
        ColumnValues::Time(v) => v.get(row).map(|t| t.to_rfc3339()).unwrap_or_default(),
    }
}

fn print_table(columns: &[Column]) {
    if columns.is_empty() {
        println!("(no columns)");
        return;
    }
    let rows = columns.iter().map(|c| c.values.len()).max().unwrap_or(0);

    let mut widths = Vec::with_capacity(columns.len());
    for col in columns {
        let mut w = col.name.len() + col.values.column_type().to_string().len() + 3;
        for row in 0..rows {
            w = w.max(cell(col, row).len());
        }
        widths.push(w);
    }

    let header: Vec<String> = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| {
            let label = format!("{} ({})", c.name, c.values.column_type());
            // Pad before coloring so the escape codes don't skew alignment.
            format!("{}", format!("{label:<0$}", w).cyan())
        })
        .collect();
    println!("{}", header.join("  "));

    for row in 0..rows {
        let line: Vec<String> = columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", cell(c, row), width = w))
            .collect();
        println!("{}", line.join("  "));
    }
}
