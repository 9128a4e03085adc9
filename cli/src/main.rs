use std::path::PathBuf;
use std::process;

use chrono::Utc;
use is_terminal::IsTerminal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cli::apply::{self, ApplyOpts};
use cli::config::{self, Flags, GlobalConfig};
use cli::inventory;
use cli::output::{CONFIG_HINT, Reporter};
use cli::render::{self, RenderFlags};
use cli::status;
use cli::{Error, Result};
use opm_api::inventory::DEFAULT_HISTORY_LIMIT;
use opm_api::{ChangeEntry, Inventory, InventoryEntry};

fn module_args() -> [clap::Arg; 3] {
    use clap::{Arg, ArgAction, ValueHint};
    [
        Arg::new("release_name")
            .long("release-name")
            .help("release name; defaults to the module name"),
        Arg::new("namespace")
            .long("namespace")
            .short('n')
            .help("target namespace"),
        Arg::new("values")
            .long("values")
            .short('f')
            .action(ArgAction::Append)
            .value_hint(ValueHint::FilePath)
            .help("values file; replaces the module's defaults, repeatable"),
    ]
}

fn kube_args() -> [clap::Arg; 2] {
    use clap::{Arg, ValueHint};
    [
        Arg::new("kubeconfig")
            .long("kubeconfig")
            .value_hint(ValueHint::FilePath)
            .help("path to the kubeconfig file"),
        Arg::new("context")
            .long("context")
            .help("kubeconfig context to use"),
    ]
}

fn main() {
    use clap::{Arg, ArgAction, Command, ValueHint, crate_version};

    let cmd = Command::new("opm")
        .version(crate_version!())
        .about("build-time application model for Kubernetes")
        .subcommand_required(true)
        .args([
            Arg::new("config")
                .long("config")
                .global(true)
                .value_hint(ValueHint::FilePath)
                .help("config file path"),
            Arg::new("registry")
                .long("registry")
                .global(true)
                .help("module registry URL"),
            Arg::new("provider")
                .long("provider")
                .global(true)
                .help("provider to transform with"),
            Arg::new("output")
                .long("output")
                .short('o')
                .global(true)
                .value_parser(["yaml", "json"])
                .help("output format"),
            Arg::new("verbose")
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("structured JSON reporting and debug logs"),
            Arg::new("timestamps")
                .long("timestamps")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("timestamps on log lines"),
        ])
        .subcommands([
            Command::new("mod")
                .about("work with modules")
                .subcommand_required(true)
                .subcommands([
                    Command::new("build")
                        .about("render a module to manifests")
                        .arg(
                            Arg::new("module")
                                .required(true)
                                .value_hint(ValueHint::DirPath),
                        )
                        .args(module_args())
                        .args([
                            Arg::new("out_dir")
                                .long("out-dir")
                                .value_hint(ValueHint::DirPath)
                                .help("write manifests here instead of stdout"),
                            Arg::new("split")
                                .long("split")
                                .action(ArgAction::SetTrue)
                                .requires("out_dir")
                                .help("one file per resource, in apply order"),
                        ]),
                    Command::new("apply")
                        .about("render a module and apply it to the cluster")
                        .arg(
                            Arg::new("module")
                                .required(true)
                                .value_hint(ValueHint::DirPath),
                        )
                        .args(module_args())
                        .args(kube_args())
                        .args([
                            Arg::new("dry_run")
                                .long("dry-run")
                                .action(ArgAction::SetTrue)
                                .help("server-side dry run; nothing persists"),
                            Arg::new("force")
                                .long("force")
                                .action(ArgAction::SetTrue)
                                .help("adopt live resources not yet managed by opm"),
                        ]),
                    Command::new("delete")
                        .about("delete a release's tracked resources")
                        .arg(Arg::new("release").required(true))
                        .arg(
                            Arg::new("namespace")
                                .long("namespace")
                                .short('n')
                                .help("release namespace"),
                        )
                        .args(kube_args())
                        .arg(
                            Arg::new("dry_run")
                                .long("dry-run")
                                .action(ArgAction::SetTrue)
                                .help("server-side dry run; nothing is deleted"),
                        ),
                    Command::new("status")
                        .about("show a release's tracked resources and health")
                        .arg(Arg::new("release").required(true))
                        .arg(
                            Arg::new("namespace")
                                .long("namespace")
                                .short('n')
                                .help("release namespace"),
                        )
                        .args(kube_args()),
                ]),
            Command::new("config")
                .about("manage the opm configuration")
                .subcommand_required(true)
                .subcommands([
                    Command::new("vet").about("validate the config file against its schema"),
                    Command::new("init")
                        .about("write a default config file")
                        .arg(
                            Arg::new("force")
                                .long("force")
                                .action(ArgAction::SetTrue)
                                .help("overwrite an existing file"),
                        ),
                ]),
        ]);

    let matches = cmd.get_matches();
    let flags = global_flags(&matches);
    setup_tracing(&flags);

    let result = match matches.subcommand() {
        Some(("mod", m)) => run_mod(flags, m),
        Some(("config", m)) => run_config(flags, m),
        _ => unreachable!(),
    };
    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(err.exit_code());
    }
}

fn global_flags(m: &clap::ArgMatches) -> Flags {
    let get = |name: &str| m.get_one::<String>(name).cloned();
    Flags {
        config: get("config"),
        registry: get("registry"),
        provider: get("provider"),
        output: get("output"),
        verbose: m.get_flag("verbose"),
        timestamps: m.get_flag("timestamps"),
        ..Default::default()
    }
}

fn setup_tracing(flags: &Flags) {
    use tracing_subscriber::{filter::EnvFilter, prelude::*};

    let default = if flags.verbose { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let stderr_is_term = std::io::stderr().is_terminal();
    let collector = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(if stderr_is_term && flags.timestamps {
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        } else {
            None
        })
        .with(if stderr_is_term && !flags.timestamps {
            Some(
                tracing_subscriber::fmt::layer()
                    .without_time()
                    .with_writer(std::io::stderr),
            )
        } else {
            None
        })
        .with(if stderr_is_term {
            None
        } else {
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
        });
    let _ = tracing::subscriber::set_global_default(collector);
}

fn run_config(flags: Flags, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("vet", _)) => {
            let path = config::vet(&flags)?;
            println!("{} is valid", path.display());
            Ok(())
        }
        Some(("init", sub)) => {
            let path = config::init(&flags, sub.get_flag("force"))?;
            println!("wrote {}", path.display());
            Ok(())
        }
        _ => unreachable!(),
    }
}

fn run_mod(mut flags: Flags, m: &clap::ArgMatches) -> Result<()> {
    let (name, sub) = m.subcommand().expect("subcommand is required");
    // Per-command kube flags feed the same precedence resolution as the
    // globals. Not every subcommand defines every flag.
    let get = |name: &str| {
        sub.try_get_one::<String>(name)
            .ok()
            .flatten()
            .cloned()
    };
    flags.namespace = get("namespace");
    flags.kubeconfig = get("kubeconfig");
    flags.context = get("context");

    let cfg = GlobalConfig::load(&flags)?;
    let reporter = Reporter::new(cfg.verbose);

    match name {
        "build" => build(&cfg, reporter, sub),
        "apply" | "delete" | "status" => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            rt.spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    token.cancel();
                }
            });
            match name {
                "apply" => rt.block_on(apply_cmd(&cfg, reporter, sub, cancel)),
                "delete" => rt.block_on(delete_cmd(&cfg, reporter, sub, cancel)),
                "status" => rt.block_on(status_cmd(&cfg, reporter, sub)),
                _ => unreachable!(),
            }
        }
        _ => unreachable!(),
    }
}

fn render_flags(sub: &clap::ArgMatches) -> RenderFlags {
    RenderFlags {
        release_name: sub.get_one::<String>("release_name").cloned(),
        values: sub
            .get_many::<String>("values")
            .unwrap_or_default()
            .map(PathBuf::from)
            .collect(),
    }
}

// Reports collected render errors; rendering is fail-on-end, so everything
// renderable was rendered regardless.
fn report_render_errors(reporter: Reporter, rendered: &render::Rendered) -> Result<()> {
    for (component, traits) in &rendered.unhandled_traits {
        reporter.warn(
            &rendered.built.release.name,
            &format!("component {component}: unhandled traits: {}", traits.join(", ")),
        );
    }
    if rendered.errors.is_empty() {
        return Ok(());
    }
    for err in &rendered.errors {
        reporter.error(&rendered.built.release.name, &err.to_string(), None);
    }
    Err(Error::RenderErrors(rendered.errors.len()))
}

fn build(cfg: &GlobalConfig, reporter: Reporter, sub: &clap::ArgMatches) -> Result<()> {
    let module = PathBuf::from(sub.get_one::<String>("module").expect("required"));
    let rendered = render::render(cfg, &module, &render_flags(sub))?;

    match sub.get_one::<String>("out_dir") {
        Some(dir) => render::emit_dir(
            &rendered.resources,
            &cfg.output.value,
            &PathBuf::from(dir),
            sub.get_flag("split"),
        )?,
        None => render::emit(
            &rendered.resources,
            &cfg.output.value,
            &mut std::io::stdout().lock(),
        )?,
    }
    report_render_errors(reporter, &rendered)
}

async fn apply_cmd(
    cfg: &GlobalConfig,
    reporter: Reporter,
    sub: &clap::ArgMatches,
    cancel: CancellationToken,
) -> Result<()> {
    let module = PathBuf::from(sub.get_one::<String>("module").expect("required"));
    let opts = ApplyOpts {
        dry_run: sub.get_flag("dry_run"),
        force: sub.get_flag("force"),
    };

    let rendered = render::render(cfg, &module, &render_flags(sub))?;
    report_render_errors(reporter, &rendered)?;
    let release = &rendered.built.release;

    let client = apply::client(cfg).await?;
    let previous = inventory::discover(&client, release).await?;
    if previous.is_none() {
        debug!("no previous inventory; running existence checks");
        apply::preflight(&client, &rendered.resources, &opts).await?;
    }

    for applied in apply::apply_all(&client, &rendered.resources, &opts, &cancel).await? {
        reporter.resource(&release.name, &applied.scope, &applied.action.to_string());
    }

    let current: Vec<InventoryEntry> =
        rendered.resources.iter().map(InventoryEntry::from).collect();
    let previous_entries = previous
        .as_ref()
        .map(|p| p.entries().to_vec())
        .unwrap_or_default();
    let stale = inventory::prunable(&previous_entries, &current);
    for deleted in apply::delete_entries(&client, &stale, opts.dry_run, &cancel).await? {
        reporter.resource(&release.name, &deleted.scope, &deleted.action.to_string());
    }

    if opts.dry_run {
        reporter.summary(&release.name, "dry run; inventory not written");
        return Ok(());
    }

    let mut inv = previous.unwrap_or_else(|| {
        Inventory::new(rendered.built.module.clone(), release.clone())
    });
    let change_id = inv.record(
        ChangeEntry {
            module: module.display().to_string(),
            module_version: rendered.built.module.version.clone(),
            values: rendered.built.values.clone(),
            digest: rendered.digest.clone(),
            timestamp: Utc::now(),
            entries: current,
        },
        DEFAULT_HISTORY_LIMIT,
    );
    inventory::write(&client, &inv).await?;
    info!(change_id, digest = rendered.digest, "inventory written");
    reporter.summary(
        &release.name,
        &format!("applied {} resource(s), change {change_id}", rendered.resources.len()),
    );
    Ok(())
}

async fn delete_cmd(
    cfg: &GlobalConfig,
    reporter: Reporter,
    sub: &clap::ArgMatches,
    cancel: CancellationToken,
) -> Result<()> {
    let release = sub.get_one::<String>("release").expect("required");
    let dry_run = sub.get_flag("dry_run");
    let namespace = &cfg.namespace.value;

    let client = apply::client(cfg).await?;
    let inv = inventory::discover_by_name(&client, namespace, release)
        .await?
        .ok_or_else(|| Error::ReleaseNotFound(release.clone()))?;

    let ordered = inventory::delete_order(inv.entries());
    for deleted in apply::delete_entries(&client, &ordered, dry_run, &cancel).await? {
        reporter.resource(release, &deleted.scope, &deleted.action.to_string());
    }
    if !dry_run {
        inventory::remove(&client, &inv).await?;
    }
    reporter.summary(release, &format!("deleted {} resource(s)", ordered.len()));
    Ok(())
}

async fn status_cmd(cfg: &GlobalConfig, reporter: Reporter, sub: &clap::ArgMatches) -> Result<()> {
    let release = sub.get_one::<String>("release").expect("required");
    let namespace = &cfg.namespace.value;

    let client = apply::client(cfg).await?;
    let inv = inventory::discover_by_name(&client, namespace, release)
        .await?
        .ok_or_else(|| {
            reporter.error(release, "no inventory found", Some(CONFIG_HINT));
            Error::ReleaseNotFound(release.clone())
        })?;

    for r in status::release_status(&client, &inv).await? {
        reporter.resource(release, &format!("{} ({})", r.scope, r.component), &r.health);
    }
    Ok(())
}
