//! CLI subcommands: init, validate, graph, plan, apply, status, completions.

use crate::backend::{self, BackendKind};
use crate::core::executor::{self, ApplyConfig, ApplyOutcome};
use crate::core::{parser, state, types};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "plinth",
    version,
    about = "Declarative resource graphs for static-website infrastructure: DAG ordering, BLAKE3 state, provenance tracing"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold a two-stack static website project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate plinth.yaml without provisioning anything
    Validate {
        /// Path to plinth.yaml
        #[arg(short, long, default_value = "plinth.yaml")]
        file: PathBuf,
    },

    /// Print stacks, dependencies and the execution order
    Graph {
        /// Path to plinth.yaml
        #[arg(short, long, default_value = "plinth.yaml")]
        file: PathBuf,
    },

    /// Show execution plan (diff desired vs last applied)
    Plan {
        /// Path to plinth.yaml
        #[arg(short, long, default_value = "plinth.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, env = "PLINTH_STATE_DIR", default_value = "state")]
        state_dir: PathBuf,

        /// Plan every resource as changed
        #[arg(long)]
        force: bool,
    },

    /// Materialize the resource graph
    Apply {
        /// Path to plinth.yaml
        #[arg(short, long, default_value = "plinth.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, env = "PLINTH_STATE_DIR", default_value = "state")]
        state_dir: PathBuf,

        /// Re-materialize every resource
        #[arg(long)]
        force: bool,

        /// Show what would be done without materializing
        #[arg(long)]
        dry_run: bool,

        /// Provisioning backend
        #[arg(long, value_enum, default_value_t = BackendKind::Simulate)]
        backend: BackendKind,

        /// Provider program for `--backend command`
        #[arg(long)]
        provider: Option<PathBuf>,

        /// Maximum in-flight materializations (overrides policy)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Show last applied state from lock files
    Status {
        /// State directory
        #[arg(long, env = "PLINTH_STATE_DIR", default_value = "state")]
        state_dir: PathBuf,

        /// Target specific stack
        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Graph { file } => cmd_graph(&file),
        Commands::Plan {
            file,
            state_dir,
            force,
        } => cmd_plan(&file, &state_dir, force),
        Commands::Apply {
            file,
            state_dir,
            force,
            dry_run,
            backend,
            provider,
            concurrency,
        } => cmd_apply(
            &file,
            &state_dir,
            ApplyFlags {
                force,
                dry_run,
                backend,
                provider,
                concurrency,
            },
        ),
        Commands::Status { state_dir, stack } => cmd_status(&state_dir, stack.as_deref()),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "plinth", &mut std::io::stdout());
            Ok(())
        }
    }
}

const INIT_TEMPLATE: &str = r#"version: "1.0"
name: static-website
description: "Bucket-backed website behind a CDN distribution"

params:
  domain_name: example.com

stacks:
  static-website:
    description: "Log bucket, content bucket and origin access identity"
    resources:
      log-bucket:
        type: storage
        params:
          bucket_name: "logs.{{params.domain_name}}"
          removal_policy: retain
          expiration_days: 180
      site-bucket:
        type: storage
        depends_on: [log-bucket]
        params:
          bucket_name: "{{params.domain_name}}"
          removal_policy: retain
          block_public_access: true
          index_document: index.html
          error_document: error.html
          access_logs_bucket: { ref: { resource: log-bucket, attribute: bucket_name } }
          access_logs_prefix: website-logs/
      oai:
        type: access_identity
        depends_on: [site-bucket]
        params:
          comment: "Allows the distribution to reach the website bucket"
    exports:
      site-bucket: { resource: site-bucket, attribute: bucket_name }
      log-bucket: { resource: log-bucket, attribute: bucket_name }
      oai-id: { resource: oai, attribute: identity_id }

  cloudfront:
    description: "Certificate, distribution, DNS records and site contents"
    depends_on: [static-website]
    resources:
      certificate:
        type: certificate
        params:
          domain_name: "{{params.domain_name}}"
          subject_alternative_names: ["www.{{params.domain_name}}"]
          validation: dns
      distribution:
        type: cdn_distribution
        params:
          origin: { import: { stack: static-website, export: site-bucket } }
          origin_access_identity: { import: { stack: static-website, export: oai-id } }
          certificate_arn: { ref: { resource: certificate, attribute: arn } }
          aliases: ["{{params.domain_name}}", "www.{{params.domain_name}}"]
          default_root_object: index.html
          price_class: PriceClass_100
          http_version: http2and3
          minimum_protocol_version: TLSv1.2_2021
          viewer_protocol_policy: redirect-to-https
          logging_bucket: { import: { stack: static-website, export: log-bucket } }
          logging_prefix: cloudfront/
          error_responses:
            - http_status: 404
              response_page_path: /error.html
      apex-a:
        type: dns_record
        params:
          record_name: "{{params.domain_name}}"
          record_type: A
          target: { ref: { resource: distribution, attribute: domain_name } }
          ttl: 86400
      apex-aaaa:
        type: dns_record
        params:
          record_name: "{{params.domain_name}}"
          record_type: AAAA
          target: { ref: { resource: distribution, attribute: domain_name } }
          ttl: 86400
      www-a:
        type: dns_record
        params:
          record_name: "www.{{params.domain_name}}"
          record_type: A
          target: { ref: { resource: distribution, attribute: domain_name } }
          ttl: 86400
      www-aaaa:
        type: dns_record
        params:
          record_name: "www.{{params.domain_name}}"
          record_type: AAAA
          target: { ref: { resource: distribution, attribute: domain_name } }
          ttl: 86400
      site-contents:
        type: deployment
        params:
          source: ./site-contents
          destination_bucket: { import: { stack: static-website, export: site-bucket } }
          distribution_id: { ref: { resource: distribution, attribute: distribution_id } }
          distribution_paths: ["/*"]
          retain_on_delete: true

policy:
  failure: continue_independent
  concurrency: 4
  tripwire: true
  lock_file: true
"#;

const INDEX_HTML: &str = "<!doctype html>\n<html>\n  <head><title>It works</title></head>\n  <body><h1>It works</h1></body>\n</html>\n";

const ERROR_HTML: &str = "<!doctype html>\n<html>\n  <head><title>Not found</title></head>\n  <body><h1>404</h1></body>\n</html>\n";

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("plinth.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;
    let contents = path.join("site-contents");
    std::fs::create_dir_all(&contents)
        .map_err(|e| format!("cannot create {}: {}", contents.display(), e))?;

    let files = [
        (config_path.clone(), INIT_TEMPLATE),
        (contents.join("index.html"), INDEX_HTML),
        (contents.join("error.html"), ERROR_HTML),
    ];
    for (file, body) in &files {
        std::fs::write(file, body).map_err(|e| format!("cannot write {}: {}", file.display(), e))?;
    }

    println!("Initialized plinth project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", contents.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);

    if errors.is_empty() {
        let resources: usize = config.stacks.values().map(|s| s.resources.len()).sum();
        println!(
            "OK: {} ({} stacks, {} resources)",
            config.name,
            config.stacks.len(),
            resources
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

fn cmd_graph(file: &Path) -> Result<(), String> {
    let (config, stacks) = parser::load_stacks(file)?;
    let graph = stacks.build_graph().map_err(|e| e.to_string())?;
    let order = graph.topological_order().map_err(|e| e.to_string())?;

    println!(
        "{}: {} resources, {} edges",
        config.name,
        graph.len(),
        graph.edge_count()
    );
    for stack in stacks.stacks() {
        println!();
        if stack.dependencies().is_empty() {
            println!("{}:", stack.name);
        } else {
            let deps: Vec<&str> = stack.dependencies().iter().map(String::as_str).collect();
            println!("{} (after {}):", stack.name, deps.join(", "));
        }
        for id in stack.nodes() {
            let Some(node) = graph.get(id) else {
                continue;
            };
            let deps: Vec<&str> = graph
                .dependencies_of(id)
                .map(|d| d.iter().map(String::as_str).collect())
                .unwrap_or_default();
            if deps.is_empty() {
                println!("  {} [{}]", id, node.kind);
            } else {
                println!("  {} [{}] <- {}", id, node.kind, deps.join(", "));
            }
        }
        for (name, export) in stack.exports() {
            println!("  export {} = {}.{}", name, export.node, export.attribute);
        }
    }
    println!();
    println!("Order: {}", order.join(" → "));
    Ok(())
}

/// Apply-time options from the command line.
struct ApplyFlags {
    force: bool,
    dry_run: bool,
    backend: BackendKind,
    provider: Option<PathBuf>,
    concurrency: Option<usize>,
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start runtime: {}", e))
}

fn cmd_plan(file: &Path, state_dir: &Path, force: bool) -> Result<(), String> {
    let flags = ApplyFlags {
        force,
        dry_run: true,
        backend: BackendKind::Simulate,
        provider: None,
        concurrency: None,
    };
    cmd_apply(file, state_dir, flags)
}

fn cmd_apply(file: &Path, state_dir: &Path, flags: ApplyFlags) -> Result<(), String> {
    let (config, stacks) = parser::load_stacks(file)?;
    let backend = backend::build_backend(flags.backend, flags.provider)?;

    let outcome = runtime()?.block_on(async {
        let (tx, rx) = tokio::sync::watch::channel(false);
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted: waiting for in-flight resources to finish...");
                let _ = tx.send(true);
            }
        });
        let outcome = executor::apply(ApplyConfig {
            config: &config,
            stacks: &stacks,
            state_dir,
            backend,
            force: flags.force,
            dry_run: flags.dry_run,
            concurrency: flags.concurrency,
            cancel: Some(rx),
        })
        .await;
        ctrl_c.abort();
        outcome
    })?;

    match outcome {
        ApplyOutcome::Preview(plan) => {
            print_plan(&plan);
            Ok(())
        }
        ApplyOutcome::Applied(report) => print_report(&report),
    }
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan) {
    println!("Planning: {} ({} resources)", plan.name, plan.changes.len());
    println!();

    let mut current_stack = String::new();
    for change in &plan.changes {
        if change.stack != current_stack {
            current_stack.clone_from(&change.stack);
            println!("{}:", current_stack);
        }
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }
    for id in &plan.retained {
        println!("  = {}: no longer declared, retained", id);
    }

    println!();
    println!(
        "Plan: {} to add, {} to change, {} unchanged, {} retained.",
        plan.to_create,
        plan.to_update,
        plan.unchanged,
        plan.retained.len()
    );
}

/// Display an apply report; errors if anything did not converge.
fn print_report(report: &types::PlanReport) -> Result<(), String> {
    let mut current_stack = String::new();
    for entry in &report.entries {
        if entry.stack != current_stack {
            current_stack.clone_from(&entry.stack);
            println!("{}:", current_stack);
        }
        let detail = match (&entry.error, &entry.blocked_by) {
            (Some(error), _) => format!(": {}", error),
            (None, Some(blocker)) => format!(" (blocked by {})", blocker),
            (None, None) => match entry.action {
                Some(action) => format!(" {} ({:.2}s)", action, entry.duration_seconds),
                None => String::new(),
            },
        };
        println!("  {} {}{}", entry.node_id, entry.new_state, detail);
    }

    println!();
    let summary = format!(
        "{} materialized, {} unchanged, {} failed, {} skipped, {} cancelled ({:.1}s)",
        report.materialized,
        report.unchanged,
        report.failed,
        report.skipped,
        report.cancelled,
        report.total_duration.as_secs_f64()
    );
    if report.is_success() {
        println!("Apply complete: {}.", summary);
        Ok(())
    } else {
        println!("Apply completed with errors: {}", summary);
        Err(format!(
            "{} resource(s) did not converge",
            report.failed + report.skipped + report.cancelled
        ))
    }
}

fn cmd_status(state_dir: &Path, stack_filter: Option<&str>) -> Result<(), String> {
    let entries = std::fs::read_dir(state_dir)
        .map_err(|e| format!("cannot read state dir {}: {}", state_dir.display(), e))?;

    let mut names: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| stack_filter.is_none_or(|filter| name == filter))
        .collect();
    names.sort();

    let mut found = false;
    for name in &names {
        let Some(lock) = state::load_lock(state_dir, name)? else {
            continue;
        };
        found = true;
        println!("Stack: {}", lock.stack);
        println!("  Generated: {}", lock.generated_at);
        println!("  Generator: {}", lock.generator);
        println!("  Resources: {}", lock.resources.len());

        for (id, rl) in &lock.resources {
            let duration = rl
                .duration_seconds
                .map(|d| format!(" ({:.2}s)", d))
                .unwrap_or_default();
            println!("    {}: {} [{}]{}", id, rl.status, rl.kind, duration);
        }
        println!();
    }

    if !found {
        println!("No state found. Run `plinth apply` first.");
    }

    Ok(())
}
