use anyhow::{Context, Result};
use clap::Parser;
use log::error;
use std::io;

mod cli;

use cli::{AnalyzeArgs, ChatArgs, Cli, Command};
use taskdesk::chat::DeepSeekClient;
use taskdesk::config::AppConfig;
use taskdesk::launcher::{App, Menu};
use taskdesk::tasks::TaskStatus;

const EXIT_SUCCESS: i32 = 0;
const EXIT_FAILURE: i32 = 1;

fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(EXIT_FAILURE);
        }
    };
    init_logging(cli.verbose, &config.log_level);

    let result = match cli.command.unwrap_or(Command::Menu) {
        Command::Menu => run_menu(config),
        Command::Analyze(args) => run_analyze(config, args),
        Command::Chat(args) => run_chat(config, args),
        Command::Balance => run_balance(&config),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            EXIT_FAILURE
        }
    };
    std::process::exit(exit_code);
}

fn init_logging(verbose: u8, configured: &str) {
    let mut builder = env_logger::Builder::new();
    match verbose {
        0 => builder.parse_filters(configured),
        1 => builder.filter_level(log::LevelFilter::Info),
        2 => builder.filter_level(log::LevelFilter::Debug),
        _ => builder.filter_level(log::LevelFilter::Trace),
    };
    builder.format_timestamp_millis().init();
}

fn run_menu(config: AppConfig) -> Result<i32> {
    let app = App::new(config);
    let stdin = io::stdin();
    Menu::new(&app, stdin.lock(), io::stdout()).run()?;
    Ok(EXIT_SUCCESS)
}

fn run_analyze(mut config: AppConfig, args: AnalyzeArgs) -> Result<i32> {
    if let Some(max) = args.max_categories {
        config.max_categories = max;
    }
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    config.validate()?;

    let app = App::new(config);
    let task_ids = app.submit_dataset_jobs(args.dir.as_deref())?;
    if task_ids.is_empty() {
        println!("No CSV files to analyze.");
        return Ok(EXIT_SUCCESS);
    }

    let mut failed = 0;
    for task_id in task_ids {
        app.manager().wait_task(task_id, None);
        let Some(task) = app.manager().get_task(task_id) else {
            continue;
        };
        match (task.status, &task.result, &task.error) {
            (TaskStatus::Completed, Some(result), _) => {
                println!("{}: {}", task.name, result["report"].as_str().unwrap_or("-"));
            }
            (status, _, error) => {
                failed += 1;
                println!("{}: {} {}", task.name, status, error.as_deref().unwrap_or(""));
            }
        }
    }
    app.shutdown();

    Ok(if failed == 0 { EXIT_SUCCESS } else { EXIT_FAILURE })
}

fn run_chat(config: AppConfig, args: ChatArgs) -> Result<i32> {
    let app = App::new(config);
    let task_id = app.submit_chat(&args.message)?;
    app.manager().wait_task(task_id, None);

    let task = app
        .manager()
        .get_task(task_id)
        .context("Chat task disappeared")?;
    let code = match task.status {
        TaskStatus::Completed => {
            let answer = task
                .result
                .as_ref()
                .and_then(|r| r["answer"].as_str().map(str::to_string))
                .unwrap_or_default();
            println!("{}", answer);
            EXIT_SUCCESS
        }
        status => {
            eprintln!("Chat {}: {}", status, task.error.as_deref().unwrap_or(""));
            EXIT_FAILURE
        }
    };
    app.shutdown();
    Ok(code)
}

fn run_balance(config: &AppConfig) -> Result<i32> {
    let client = DeepSeekClient::from_config(&config.chat).context("Failed to set up chat client")?;
    let balance = client.balance().context("Failed to fetch balance")?;
    println!("Model: {}", client.model());
    println!("{}", serde_json::to_string_pretty(&balance)?);
    Ok(EXIT_SUCCESS)
}

