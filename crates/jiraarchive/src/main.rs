use std::env;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use jiraarchive_core::archive::{
    ArchiveOptions, ArchiveOutcome, ArchiveReport, archive_loaded_page, resolve_page_id,
};
use jiraarchive_core::config::{ArchiveConfig, ValueSource, load_config, resolve_config_path};
use jiraarchive_core::confluence::{ConfluenceClient, PageStore, PageSummary};
use jiraarchive_core::http::{Credentials, HttpClientConfig, HttpTransport};
use jiraarchive_core::jira::JiraClient;
use jiraarchive_core::widgets::find_widgets_with;

const PASSWORD_PROMPT: &str = "Confluence password? ";

#[derive(Debug, Parser)]
#[command(
    name = "jiraarchive",
    version,
    about = "Replace Jira issue-list macros on a Confluence page with static issue references"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics and debug logs")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "List the most recently modified pages")]
    Recent(RecentArgs),
    #[command(about = "List the Jira list widgets on a page without changing it")]
    Scan(ScanArgs),
    #[command(about = "Archive every Jira list widget on a page")]
    Archive(ArchiveArgs),
    #[command(about = "Print the resolved configuration")]
    Config,
}

#[derive(Debug, Args)]
struct RecentArgs {
    #[arg(long, value_name = "N", help = "Number of pages to list")]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct ScanArgs {
    page_id: String,
}

#[derive(Debug, Args)]
struct ArchiveArgs {
    #[arg(help = "Page id, or a number from the recent pages list")]
    page: Option<String>,
    #[arg(short = 'y', long, help = "Skip the confirmation prompt")]
    yes: bool,
    #[arg(long, help = "Resolve widgets but do not upload the page")]
    dry_run: bool,
    #[arg(long, help = "Print the rewritten page body")]
    print_body: bool,
}

struct Runtime {
    config: ArchiveConfig,
    config_path: PathBuf,
    config_source: ValueSource,
    diagnostics: bool,
}

impl Runtime {
    fn diagnostics(&self) -> String {
        format!(
            "config_path={} ({})\nconfluence_url={}\njira_url={}\nentity_decoding={}\nuser_agent={}",
            normalize_path(&self.config_path),
            self.config_source.as_str(),
            self.config.confluence_url().as_deref().unwrap_or("<unset>"),
            self.config.jira_url().as_deref().unwrap_or("<unset>"),
            self.config.entity_decoding().as_str(),
            self.config.user_agent()
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(cli.diagnostics);

    let runtime = load_runtime(&cli)?;

    match cli.command {
        Some(Commands::Recent(args)) => run_recent(&runtime, args),
        Some(Commands::Scan(args)) => run_scan(&runtime, args),
        Some(Commands::Archive(args)) => run_archive(&runtime, args),
        Some(Commands::Config) => run_config(&runtime),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(diagnostics: bool) {
    let level = if diagnostics {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn load_runtime(cli: &Cli) -> Result<Runtime> {
    let cwd = env::current_dir().context("failed to read current directory")?;
    let (config_path, config_source) = resolve_config_path(cli.config.as_deref(), &cwd);
    if config_source == ValueSource::Flag && !config_path.exists() {
        bail!("config file not found: {}", normalize_path(&config_path));
    }
    let config = load_config(&config_path)?;
    log::debug!("loaded config from {}", normalize_path(&config_path));

    Ok(Runtime {
        config,
        config_path,
        config_source,
        diagnostics: cli.diagnostics,
    })
}

fn run_recent(runtime: &Runtime, args: RecentArgs) -> Result<()> {
    let limit = args.limit.unwrap_or_else(|| runtime.config.suggestions());
    let credentials = collect_credentials()?;
    let mut store = confluence_client(runtime, credentials)?;
    let pages = store.recent_pages(limit)?;

    println!("Showing the {} most recently modified pages.", pages.len());
    print_suggestions(&pages);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", runtime.diagnostics());
        println!("request_count: {}", store.request_count());
    }
    Ok(())
}

fn run_scan(runtime: &Runtime, args: ScanArgs) -> Result<()> {
    let credentials = collect_credentials()?;
    let mut store = confluence_client(runtime, credentials)?;
    let page = store.get_page(args.page_id.trim())?;
    let widgets = find_widgets_with(&page.body, runtime.config.entity_decoding())
        .with_context(|| format!("failed to scan page {}", page.id))?;

    println!("page: \"{}\" in space \"{}\"", page.title, page.space_name);
    println!("version: {}", page.version);
    println!("widgets.count: {}", widgets.len());
    for widget in &widgets {
        println!(
            "widget: bytes {}..{} query: {}",
            widget.start, widget.stop, widget.query
        );
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", runtime.diagnostics());
    }
    Ok(())
}

fn run_archive(runtime: &Runtime, args: ArchiveArgs) -> Result<()> {
    let credentials = collect_credentials()?;
    let mut store = confluence_client(runtime, credentials.clone())?;
    let mut search = jira_client(runtime, credentials)?;

    let page_id = match args.page.as_deref() {
        Some(input) => {
            let trimmed = input.trim();
            let needs_suggestions = trimmed
                .parse::<usize>()
                .is_ok_and(|index| index >= 1 && index <= runtime.config.suggestions());
            if needs_suggestions {
                let suggestions = store.recent_pages(runtime.config.suggestions())?;
                resolve_page_id(trimmed, &suggestions)?
            } else {
                resolve_page_id(trimmed, &[])?
            }
        }
        None => select_page_interactively(runtime, &mut store)?,
    };

    let page = store.get_page(&page_id)?;
    println!(
        "\nSelected page: \"{}\" in space \"{}\".",
        page.title, page.space_name
    );
    if !args.yes && !confirm("Is this correct? [y/n]: ")? {
        println!("Exiting program.");
        return Ok(());
    }

    let options = ArchiveOptions {
        decoding: runtime.config.entity_decoding(),
        version_message: runtime.config.version_message().to_string(),
        dry_run: args.dry_run,
    };
    let report = archive_loaded_page(
        &mut store,
        &mut search,
        &runtime.config.reference_template(),
        &page,
        &options,
    )?;

    print_archive_report(&report);
    if args.print_body
        && let Some(body) = &report.new_body
    {
        println!("\n[body]\n{body}");
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", runtime.diagnostics());
    }
    Ok(())
}

fn run_config(runtime: &Runtime) -> Result<()> {
    let template = runtime.config.reference_template();
    println!("config_path: {}", normalize_path(&runtime.config_path));
    println!("config_source: {}", runtime.config_source.as_str());
    println!(
        "confluence.url: {}",
        runtime.config.confluence_url().as_deref().unwrap_or("<unset>")
    );
    println!(
        "jira.url: {}",
        runtime.config.jira_url().as_deref().unwrap_or("<unset>")
    );
    println!("reference.macro_id: {}", template.macro_id);
    println!("reference.server_name: {}", template.server_name);
    println!("reference.server_id: {}", template.server_id);
    println!("reference.columns: {}", template.columns);
    println!(
        "archive.version_message: {}",
        runtime.config.version_message()
    );
    println!("archive.suggestions: {}", runtime.config.suggestions());
    println!(
        "archive.entity_decoding: {}",
        runtime.config.entity_decoding().as_str()
    );
    println!("http.user_agent: {}", runtime.config.user_agent());
    Ok(())
}

fn select_page_interactively(runtime: &Runtime, store: &mut ConfluenceClient) -> Result<String> {
    let count = runtime.config.suggestions();
    let suggestions = store.recent_pages(count)?;
    println!("Successfully logged in.");
    println!("\nShowing the {count} most recently modified pages.");
    print_suggestions(&suggestions);
    println!(
        "\nEnter a number from 1 to {} to select one of the suggested pages.\nIf you want to select a different page, enter its page ID.",
        suggestions.len()
    );
    let input = prompt("? ")?;
    resolve_page_id(&input, &suggestions)
}

fn print_suggestions(pages: &[PageSummary]) {
    for (index, page) in pages.iter().enumerate() {
        println!(
            "{}: \"{}\" in space \"{}\" (id {})",
            index + 1,
            page.title,
            page.space_name,
            page.id
        );
    }
}

fn print_archive_report(report: &ArchiveReport) {
    if report.outcome == ArchiveOutcome::NothingToArchive {
        println!("\nNo Jira widgets found on the specified page. Nothing to archive.");
        return;
    }

    println!(
        "\nFound {} Jira widget(s) on the specified page.",
        report.widgets.len()
    );
    println!("Found the following issues:");
    for widget in &report.widgets {
        for issue in &widget.issues {
            println!("{} {}", issue.key, issue.summary);
        }
    }
    println!();
    println!("outcome: {}", report.outcome.as_str());
    println!("issues.count: {}", report.issue_count());
    println!("previous_version: {}", report.previous_version);
    match report.new_version {
        Some(version) => println!("new_version: {version}"),
        None => println!("new_version: <not uploaded>"),
    }
    println!("request_count: {}", report.request_count);
    if report.outcome == ArchiveOutcome::Archived {
        println!("Page successfully updated.");
    }
}

fn confluence_client(runtime: &Runtime, credentials: Credentials) -> Result<ConfluenceClient> {
    let base_url = runtime.config.confluence_url().ok_or_else(|| {
        anyhow::anyhow!("Confluence URL is not configured (set CONFLUENCE_URL or [confluence] url)")
    })?;
    let transport = HttpTransport::new(HttpClientConfig::from_config(&runtime.config), credentials)?;
    Ok(ConfluenceClient::new(transport, base_url))
}

fn jira_client(runtime: &Runtime, credentials: Credentials) -> Result<JiraClient> {
    let base_url = runtime.config.jira_url().ok_or_else(|| {
        anyhow::anyhow!("Jira URL is not configured (set JIRA_URL or [jira] url)")
    })?;
    let transport = HttpTransport::new(HttpClientConfig::from_config(&runtime.config), credentials)?;
    Ok(JiraClient::new(transport, base_url))
}

fn collect_credentials() -> Result<Credentials> {
    resolve_credentials(
        env_credential("CONFLUENCE_USERNAME"),
        env_credential("CONFLUENCE_PASSWORD"),
        || {
            println!("Enter your Confluence credentials.");
            prompt("Confluence username? ")
        },
        || rpassword::prompt_password(PASSWORD_PROMPT).context("failed to read password"),
    )
}

/// Use the given values where present, asking only for what is missing.
fn resolve_credentials<U, P>(
    username: Option<String>,
    password: Option<String>,
    ask_username: U,
    ask_password: P,
) -> Result<Credentials>
where
    U: FnOnce() -> Result<String>,
    P: FnOnce() -> Result<String>,
{
    let username = match username {
        Some(value) => value,
        None => ask_username()?,
    };
    let password = match password {
        Some(value) => value,
        None => ask_password()?,
    };
    if username.is_empty() || password.is_empty() {
        bail!("Confluence username and password are required");
    }
    Ok(Credentials { username, password })
}

fn env_credential(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn confirm(label: &str) -> Result<bool> {
    let answer = prompt(label)?;
    Ok(matches!(answer.as_str(), "y" | "yes"))
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_archive_flags() {
        let cli = Cli::try_parse_from(["jiraarchive", "archive", "12345", "--yes", "--dry-run"])
            .expect("parse");
        match cli.command {
            Some(Commands::Archive(args)) => {
                assert_eq!(args.page.as_deref(), Some("12345"));
                assert!(args.yes);
                assert!(args.dry_run);
                assert!(!args.print_body);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_accepts_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "jiraarchive",
            "recent",
            "--limit",
            "3",
            "--config",
            "custom.toml",
            "--diagnostics",
        ])
        .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(cli.diagnostics);
        assert!(matches!(
            cli.command,
            Some(Commands::Recent(RecentArgs { limit: Some(3) }))
        ));
    }

    #[test]
    fn credentials_from_environment_skip_prompts() {
        let credentials = resolve_credentials(
            Some("alice".to_string()),
            Some("secret".to_string()),
            || panic!("username prompt must not run"),
            || panic!("password prompt must not run"),
        )
        .expect("credentials");
        assert_eq!(credentials.username, "alice");
        assert_eq!(credentials.password, "secret");
    }

    #[test]
    fn missing_password_goes_through_hidden_prompt() {
        let mut asked = false;
        let credentials = resolve_credentials(
            Some("alice".to_string()),
            None,
            || panic!("username prompt must not run"),
            || {
                asked = true;
                Ok("typed".to_string())
            },
        )
        .expect("credentials");
        assert!(asked);
        assert_eq!(credentials.password, "typed");
        assert!(!PASSWORD_PROMPT.contains("visible"));
    }

    #[test]
    fn empty_credentials_are_rejected() {
        let error = resolve_credentials(
            None,
            None,
            || Ok("alice".to_string()),
            || Ok(String::new()),
        )
        .expect_err("must fail");
        assert!(error.to_string().contains("username and password are required"));
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
