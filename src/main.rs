mod config;
mod heuristics;
mod llm_client;
mod llm_extract;
mod lookup;
mod models;
mod pdf_extract;
mod pipeline;
mod supplier;
mod uom;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::Config;
use pipeline::Pipeline;

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, PartialEq)]
enum Mode {
    Run,
    Single(PathBuf),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter("info")
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().skip(1).any(|a| a == "--help" || a == "-h") {
        print_usage(&args[0]);
        return Ok(());
    }

    let mut config = Config::load_or_default(CONFIG_FILE);
    let mode = match parse_args(&args[1..], &mut config) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {e}");
            print_usage(&args[0]);
            std::process::exit(1);
        }
    };

    match mode {
        Mode::Single(pdf) => run_single(&config, &pdf).await,
        Mode::Run => run_folder(&config).await,
    }
}

/// Apply command-line overrides onto the loaded config. The options mirror
/// the config file so a flag always wins over `config.toml`.
fn parse_args(args: &[String], config: &mut Config) -> Result<Mode, String> {
    let mut mode = Mode::Run;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "single" => {
                let path = args
                    .get(i + 1)
                    .ok_or("'single' requires a PDF path".to_string())?;
                mode = Mode::Single(PathBuf::from(path));
                i += 1;
            }
            "--input" | "-i" => {
                let dir = args
                    .get(i + 1)
                    .ok_or("--input requires a directory".to_string())?;
                config.io.input_dir = dir.clone();
                i += 1;
            }
            "--output" | "-o" => {
                let dir = args
                    .get(i + 1)
                    .ok_or("--output requires a directory".to_string())?;
                config.io.output_dir = dir.clone();
                i += 1;
            }
            "--parallel" | "-j" => {
                let n = args
                    .get(i + 1)
                    .ok_or("--parallel requires a number".to_string())?;
                config.pipeline.parallelism = n
                    .parse::<usize>()
                    .map_err(|_| format!("invalid worker count '{n}'"))?
                    .max(1);
                i += 1;
            }
            "--no-lookup-agent" => config.pipeline.use_lookup_agent = false,
            "--no-llm-fallback" => config.pipeline.use_llm_fallback = false,
            "--no-llm-primary" => config.pipeline.use_llm_primary = false,
            other => return Err(format!("unknown option '{other}'")),
        }
        i += 1;
    }
    Ok(mode)
}

fn print_usage(program: &str) {
    println!("Process invoice PDFs and write structured JSON line items.");
    println!();
    println!("USAGE:");
    println!("    {program} [options]           Process every PDF in the input directory");
    println!("    {program} single <pdf>        Process one PDF and print JSON to stdout");
    println!();
    println!("OPTIONS:");
    println!("    -i, --input <dir>      Input directory with PDF invoices (default: ./input)");
    println!("    -o, --output <dir>     Output directory for JSON files (default: ./output)");
    println!("    -j, --parallel <N>     Process N PDFs in parallel (default: 1)");
    println!("        --no-lookup-agent  Disable the batched UOM lookup for ambiguous lines");
    println!("        --no-llm-fallback  Disable LLM extraction when parsers find 0 items");
    println!("        --no-llm-primary   Disable LLM primary extraction");
    println!("    -h, --help             Show this help");
}

async fn run_single(config: &Config, pdf_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = Pipeline::from_config(config).await;
    let result = pipeline.process_invoice(pdf_path).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_folder(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let input = PathBuf::from(&config.io.input_dir);
    let output = PathBuf::from(&config.io.output_dir);

    if !input.exists() {
        std::fs::create_dir_all(&input)?;
        println!(
            "Created input directory: {}. Add PDFs and run again.",
            std::path::absolute(&input)?.display()
        );
        return Ok(());
    }

    let pipeline = Arc::new(Pipeline::from_config(config).await);
    let results =
        pipeline::run_on_folder(pipeline, &input, &output, config.pipeline.parallelism).await?;

    let total_items: usize = results.iter().map(|r| r.line_items.len()).sum();
    let total_escalations: usize = results.iter().map(|r| r.escalation_count()).sum();
    println!(
        "Processed {} invoice(s). Output in: {}",
        results.len(),
        std::path::absolute(&output)?.display()
    );
    for result in &results {
        println!(
            "  - {}: {} line items",
            result.source_file,
            result.line_items.len()
        );
    }
    if !results.is_empty() {
        println!(
            "Total: {total_items} line items in {} file(s)",
            results.len()
        );
    }
    if total_escalations > 0 {
        println!("Escalations for review: {total_escalations}");
    }
    Ok(())
}
