use std::io::IsTerminal;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgGroup, CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};

use blamescope_core::{BlamescopeConfig, ChangeSet, HistoryOrder, LineRange, OutputFormat};
use blamescope_correlate::correlate::{correlate, correlate_with_index, CommitDetails};
use blamescope_correlate::report::{CiContext, FindingsReport, GitReport};
use blamescope_gitpulse::attribution::{Attribution, LineAttributionResolver};
use blamescope_gitpulse::git::GitCli;
use blamescope_gitpulse::index::{build_change_index, ChangeIndex};
use blamescope_gitpulse::mining::{list_commits, WalkOptions};

#[derive(Parser)]
#[command(
    name = "blamescope",
    version,
    about = "Tie security findings and suspicious lines back to the commits and people behind them",
    long_about = "blamescope audits revision history for CI security pipelines.\n\n\
                   It extracts the lines each commit added, keeps only the static-analysis\n\
                   findings that land on those lines, and answers who last touched a range.\n\n\
                   Examples:\n  \
                     git show HEAD | blamescope changes                 Changed lines of a patch\n  \
                     blamescope report                                  HEAD change report for CI\n  \
                     blamescope history --max-commits 500               Index recent history\n  \
                     blamescope correlate --findings opengrep.json --git-report ci_git_report.json\n  \
                     blamescope blame src/app.py --lines 10-20 --trace  Who wrote these lines"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .blamescope.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text  Human-readable summaries (default)\n  \
                         json  Machine-readable JSON with snake_case keys"
    )]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto")]
    color: ColorChoice,
}

#[derive(Subcommand)]
enum Command {
    /// List the lines a unified diff adds
    #[command(long_about = "List the lines a unified diff adds, per file.\n\n\
        Line numbers refer to the new side of the diff. Deleted files and files\n\
        with only removals are omitted. Reads from stdin or a file.\n\n\
        Examples:\n  git show HEAD | blamescope changes\n  blamescope changes --file changes.patch --format json")]
    Changes {
        /// Read diff from file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Write the change report for the commit at HEAD
    #[command(long_about = "Write the change report for the commit at HEAD.\n\n\
        Records HEAD's metadata, the GitHub Actions context (GITHUB_* variables and\n\
        the event payload), and the lines HEAD added relative to its first parent.\n\n\
        Examples:\n  blamescope report\n  blamescope report --path ../service --output out/ci_git_report.json")]
    Report {
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Where to write the report
        #[arg(long, default_value = "ci_git_report.json")]
        output: PathBuf,
    },
    /// Index the lines every commit in history added
    #[command(
        long_about = "Index the lines every commit in history added.\n\n\
        Enumerates commits from HEAD (or --branch), fetches each commit's patch with\n\
        bounded concurrency, and saves one changed-line set per commit. A commit whose\n\
        patch cannot be fetched is kept with no lines and counted as failed.\n\n\
        Examples:\n  blamescope history\n  blamescope history --max-commits 200 --workers 16\n  blamescope history --oldest-first --output history.json"
    )]
    History {
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Where to write the index
        #[arg(long, default_value = "git_history.json")]
        output: PathBuf,

        /// Concurrent patch fetches (default: history.workers)
        #[arg(long)]
        workers: Option<usize>,

        /// Keep only the most recent N commits
        #[arg(long)]
        max_commits: Option<usize>,

        /// List commits oldest first
        #[arg(long)]
        oldest_first: bool,

        /// Branch to walk instead of HEAD
        #[arg(long)]
        branch: Option<String>,
    },
    /// Keep the findings that land on changed lines
    #[command(
        long_about = "Keep the static-analysis findings that land on changed lines.\n\n\
        Findings are read from a `{\"results\": [...]}` file (OpenGrep/Semgrep JSON).\n\
        With --git-report, findings are matched against the lines HEAD added; with\n\
        --history, each finding is attributed to the first indexed commit that added\n\
        its line.\n\n\
        Examples:\n  blamescope correlate --findings opengrep.json --git-report ci_git_report.json\n  blamescope correlate --findings opengrep.json --history git_history.json"
    )]
    #[command(group(ArgGroup::new("changes").required(true).args(["git_report", "history"])))]
    Correlate {
        /// Findings file
        #[arg(long, visible_alias = "opengrep-report")]
        findings: PathBuf,

        /// Change report written by `blamescope report`
        #[arg(long)]
        git_report: Option<PathBuf>,

        /// Change index written by `blamescope history`
        #[arg(long)]
        history: Option<PathBuf>,

        /// Where to write the correlation report (default: correlate.output)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Show who last touched a range of lines
    #[command(
        long_about = "Show who last touched a range of lines.\n\n\
        Give the range with --lines, or paste the code with --snippet and let\n\
        blamescope find it (indentation and blank lines are ignored). --trace adds\n\
        the range's history so you can see who introduced the logic rather than\n\
        who last reformatted it.\n\n\
        Examples:\n  blamescope blame src/app.py --lines 10-20\n  blamescope blame src/app.py --snippet 'eval(request.body)' --trace"
    )]
    #[command(group(ArgGroup::new("target").required(true).args(["lines", "snippet"])))]
    Blame {
        /// File to inspect, relative to the current directory
        file: String,

        /// Line range such as 15 or 10-20
        #[arg(long)]
        lines: Option<LineRange>,

        /// Code to search for in the file
        #[arg(long)]
        snippet: Option<String>,

        /// Also show the range's history (git log -L)
        #[arg(long)]
        trace: bool,

        /// Attribute whitespace-only edits to their own commits
        #[arg(long)]
        no_ignore_whitespace: bool,
    },
    /// Create a default .blamescope.toml configuration file
    #[command(long_about = "Create a default .blamescope.toml configuration file.\n\n\
        Generates a commented template with all available options.\n\
        Fails if .blamescope.toml already exists.")]
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!("blamescope v{version}\n");

    println!("Quick start:");
    println!("  blamescope init                 Create a .blamescope.toml config file");
    println!("  blamescope report               Write ci_git_report.json for HEAD");
    println!("  blamescope correlate --findings opengrep.json --git-report ci_git_report.json\n");

    println!("All commands:");
    println!("  changes    Lines added by a unified diff");
    println!("  report     HEAD change report with CI context");
    println!("  history    Changed lines of every commit in history");
    println!("  correlate  Findings on changed lines, with commit details");
    println!("  blame      Who last touched a line range or snippet");
    println!("  init       Create default configuration\n");

    println!("Run 'blamescope <command> --help' for details.");
}

fn read_diff_input(file: &Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err(format!("reading {}", path.display())),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .into_diagnostic()
                .wrap_err("reading stdin")?;
            Ok(input)
        }
    }
}

/// Render sorted line numbers compactly: `1-3, 7, 9-10`.
fn format_lines(lines: &[u32]) -> String {
    let mut spans: Vec<String> = Vec::new();
    let mut iter = lines.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            spans.push(start.to_string());
        } else {
            spans.push(format!("{start}-{end}"));
        }
    }
    spans.join(", ")
}

fn print_changes(changes: &ChangeSet) {
    if changes.is_empty() {
        println!("No added lines.");
        return;
    }
    for (path, lines) in changes.iter() {
        println!("{path}: {}", format_lines(lines));
    }
    println!(
        "\n{} lines across {} files",
        changes.line_count(),
        changes.file_count()
    );
}

fn ensure_git_repo(path: &Path) -> Result<()> {
    if git2::Repository::discover(path).is_err() {
        miette::bail!(miette::miette!(
            help = "Run blamescope from inside a git repository, or specify --path to one",
            "Not a git repository: {}",
            path.display()
        ));
    }
    Ok(())
}

fn print_attribution(
    attribution: &Attribution,
    trace: Option<&str>,
    config: &BlamescopeConfig,
    use_color: bool,
) {
    let summary = &attribution.summary;
    println!(
        "\n--- Blame analysis for {}:{} ---",
        attribution.file, attribution.range
    );
    let primary = format!("{} <{}>", summary.primary.name, summary.primary.email);
    if use_color {
        println!("Primary author (latest): \x1b[92m{primary}\x1b[0m");
    } else {
        println!("Primary author (latest): {primary}");
    }
    println!(
        "Confidence: {:?} ({} of {} lines)",
        summary.confidence, summary.primary.lines_count, summary.total_lines
    );

    if summary.contributors.len() > 1 {
        println!("\nOther contributors:");
        for c in &summary.contributors[1..] {
            println!("  - {} <{}>: {} lines", c.name, c.email, c.lines_count);
        }
    }

    let preview = config.attribution.preview_lines;
    println!("\nSnippet:");
    for record in attribution.records.iter().take(preview) {
        println!(
            "  {} ({}) {}",
            record.short_hash(),
            record.date().unwrap_or_else(|| record.timestamp.clone()),
            record.content.trim()
        );
    }
    if attribution.records.len() > preview {
        println!("  ...");
    }

    if let Some(trace) = trace {
        println!(
            "\n--- History trace (git log -L {},{}:{}) ---",
            attribution.range.start, attribution.range.end, attribution.file
        );
        println!("Review the patches below to find who introduced the logic, not just who formatted it.\n");
        let limit = config.attribution.trace_preview_chars;
        match trace.char_indices().nth(limit) {
            Some((cut, _)) => {
                println!("{}", &trace[..cut]);
                println!("\n... (output truncated, use --format json for the full trace) ...");
            }
            None => println!("{trace}"),
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# blamescope configuration
# See: https://github.com/Meru143/blamescope

[history]
# Concurrent patch fetches while indexing
# workers = 8
# Seconds before a single git invocation is abandoned
# timeout_secs = 30
# "newest-first" or "oldest-first"
# order = "newest-first"
# Merge commits: "first" diffs against the first parent, "union" against all parents
# merge_parents = "first"
# max_commits = 500
# branch = "main"

[attribution]
# Attribute whitespace-only edits to the commit before them
# ignore_whitespace = true
# Blamed lines shown in text output
# preview_lines = 5
# Characters of `--trace` output shown in text output
# trace_preview_chars = 2000

[correlate]
# output = "vulnerability_report.json"
"#;

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "info" } else { "warn" }),
    )
    .format_timestamp(None)
    .init();

    let config = match &cli.config {
        Some(path) => BlamescopeConfig::from_file(path)?,
        None => {
            let default_path = Path::new(".blamescope.toml");
            if default_path.exists() {
                BlamescopeConfig::from_file(default_path)?
            } else {
                BlamescopeConfig::default()
            }
        }
    };

    let use_color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    };
    let timeout = Duration::from_secs(config.history.timeout_secs);

    log::info!("format: {}", cli.format);

    match cli.command {
        None => {
            print_welcome();
            return Ok(());
        }
        Some(Command::Changes { ref file }) => {
            let input = read_diff_input(file)?;
            let changes = blamescope_difflens::parser::parse_changed_lines(&input);

            match cli.format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&changes).into_diagnostic()?
                    );
                }
                OutputFormat::Text => print_changes(&changes),
            }
        }
        Some(Command::Report {
            ref path,
            ref output,
        }) => {
            ensure_git_repo(path)?;

            let git = GitCli::new(path, timeout);
            let report = GitReport::for_head(&git, CiContext::from_env()).await?;
            report.save(output)?;

            match cli.format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&report).into_diagnostic()?
                    );
                }
                OutputFormat::Text => {
                    let hash = report.git_info.commit_hash.as_deref().unwrap_or("unknown");
                    println!(
                        "Commit: {} by {}",
                        hash.get(..7).unwrap_or(hash),
                        report
                            .git_info
                            .commit_author_name
                            .as_deref()
                            .unwrap_or("unknown")
                    );
                    if let Some(event) = &report.ci_context.event_name {
                        println!("CI event: {event}");
                    }
                    if let Some(creator) = &report.ci_context.pr_creator {
                        println!("PR creator: {creator}");
                    }
                    println!(
                        "Files touched: {}",
                        report.changed_files_list.len()
                    );
                    print_changes(&report.changed_lines);
                }
            }
            eprintln!("Report saved to {}", output.display());
        }
        Some(Command::History {
            ref path,
            ref output,
            workers,
            max_commits,
            oldest_first,
            ref branch,
        }) => {
            ensure_git_repo(path)?;

            let mut history = config.history.clone();
            if let Some(n) = workers {
                history.workers = n;
            }
            if max_commits.is_some() {
                history.max_commits = max_commits;
            }
            if oldest_first {
                history.order = HistoryOrder::OldestFirst;
            }
            if branch.is_some() {
                history.branch = branch.clone();
            }
            if history.workers == 0 {
                miette::bail!(miette::miette!(
                    help = "Use --workers 1 or more",
                    "workers must be positive"
                ));
            }

            let commits = list_commits(path, &WalkOptions::from(&history))?;
            eprintln!(
                "Indexing {} commits at {} ({} workers)...",
                commits.len(),
                path.display(),
                history.workers
            );

            let progress = if std::io::stderr().is_terminal() {
                let pb = indicatif::ProgressBar::new(commits.len() as u64);
                pb.set_style(
                    indicatif::ProgressStyle::with_template(
                        "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} commits ({elapsed})",
                    )
                    .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar()),
                );
                pb.enable_steady_tick(Duration::from_millis(120));
                Some(pb)
            } else {
                None
            };

            let git = GitCli::new(path, timeout);
            let merge_parents = history.merge_parents;
            let index = build_change_index(commits, history.order, history.workers, |hash| {
                let git = git.clone();
                let progress = progress.clone();
                async move {
                    let diff = git.commit_diff(&hash, merge_parents).await;
                    if let Some(pb) = &progress {
                        pb.inc(1);
                    }
                    diff
                }
            })
            .await;

            if let Some(pb) = progress {
                pb.finish_and_clear();
            }
            index.save(output)?;

            let lines: usize = index
                .commits
                .iter()
                .map(|r| r.changed_lines.line_count())
                .sum();
            match cli.format {
                OutputFormat::Json => {
                    let summary = serde_json::json!({
                        "commits": index.len(),
                        "failed_commits": index.failed_commits,
                        "changed_lines": lines,
                        "order": index.order,
                        "output": output.display().to_string(),
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&summary).into_diagnostic()?
                    );
                }
                OutputFormat::Text => {
                    println!(
                        "Indexed {} commits ({}), {} added lines.",
                        index.len(),
                        index.order,
                        lines
                    );
                    if index.failed_commits > 0 {
                        println!(
                            "{} commits had no retrievable patch and are recorded with no changes.",
                            index.failed_commits
                        );
                    }
                }
            }
            eprintln!("Index saved to {}", output.display());
        }
        Some(Command::Correlate {
            ref findings,
            ref git_report,
            ref history,
            ref output,
        }) => {
            let findings = FindingsReport::load(findings)?;
            eprintln!("Total findings: {}", findings.results.len());

            let report = match (git_report, history) {
                (Some(path), _) => {
                    let git_report = GitReport::load(path)?;
                    let details = CommitDetails::from(&git_report);
                    correlate(&findings.results, &git_report.changed_lines, &details)
                }
                (None, Some(path)) => {
                    let index = ChangeIndex::load(path)?;
                    correlate_with_index(&findings.results, &index)
                }
                (None, None) => unreachable!("clap requires --git-report or --history"),
            };

            let output = output
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.correlate.output));
            report.save(&output)?;

            match cli.format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&report.summary).into_diagnostic()?
                    );
                }
                OutputFormat::Text => {
                    println!(
                        "Findings on changed lines: {} of {}",
                        report.summary.relevant_findings, report.summary.total_findings
                    );
                    if report.summary.skipped_findings > 0 {
                        println!(
                            "Skipped {} findings without a path or start line.",
                            report.summary.skipped_findings
                        );
                    }
                    if let Some(n) = report.summary.commits_matched {
                        println!("Commits implicated: {n}");
                    }
                }
            }
            eprintln!("Report saved to {}", output.display());
        }
        Some(Command::Blame {
            ref file,
            lines,
            ref snippet,
            trace,
            no_ignore_whitespace,
        }) => {
            let range = match (lines, snippet) {
                (_, Some(snippet)) => {
                    match blamescope_gitpulse::snippet::locate_in_file(Path::new(file), snippet)? {
                        Some(range) => {
                            eprintln!("Snippet found at lines {range}");
                            range
                        }
                        None => {
                            eprintln!("Error: snippet not found in {file}");
                            std::process::exit(1);
                        }
                    }
                }
                (Some(range), None) => range,
                (None, None) => unreachable!("clap requires --lines or --snippet"),
            };

            let ignore_whitespace = config.attribution.ignore_whitespace && !no_ignore_whitespace;
            let resolver = LineAttributionResolver::new(GitCli::new(".", timeout));
            let Some(attribution) = resolver.attribute(file, range, ignore_whitespace).await
            else {
                eprintln!("Error: no blame data for {file}:{range}");
                std::process::exit(1);
            };

            let trace_output = if trace {
                let out = resolver.trace(file, range).await;
                if out.is_none() {
                    eprintln!("No trace history available: the lines may not exist as a block in older history.");
                }
                out
            } else {
                None
            };

            match cli.format {
                OutputFormat::Json => {
                    let report = attribution.to_report(trace_output);
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&report).into_diagnostic()?
                    );
                }
                OutputFormat::Text => {
                    print_attribution(&attribution, trace_output.as_deref(), &config, use_color);
                }
            }
        }
        Some(Command::Init) => {
            let path = Path::new(".blamescope.toml");
            if path.exists() {
                miette::bail!(".blamescope.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .blamescope.toml with default configuration");
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "blamescope", &mut std::io::stdout());
        }
    }

    Ok(())
}
