//! Build and task support for the OPM workspace.

use std::{
    env,
    io::Read,
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    process::{self, Command as Proc, Stdio},
};

use signal_hook::{consts::SIGINT, low_level::pipe};

fn main() {
    use clap::{Arg, ArgAction, Command, crate_name, crate_version};
    let cmd = Command::new(crate_name!())
        .version(crate_version!())
        .about("Build + task support for opm")
        .subcommand_required(true)
        .subcommands(&[
            Command::new("ci")
                .about("spin up a kind cluster, then run the cluster-backed tests")
                .arg(Arg::new("pass").trailing_var_arg(true).num_args(..)),
            Command::new("demo")
                .about("spin up a kind cluster with a kubeconfig ready for `opm mod apply`")
                .args(&[Arg::new("keep")
                    .long("keep")
                    .help("don't tear the cluster down on exit")
                    .action(ArgAction::SetTrue)]),
        ]);

    if let Err(e) = match cmd.get_matches().subcommand() {
        Some(("ci", m)) => ci(CiOpts::from(m)),
        Some(("demo", m)) => demo(DemoOpts::from(m)),
        _ => unreachable!(),
    } {
        eprintln!("{e}");
        process::exit(1);
    }
}

type DynError = Box<dyn std::error::Error>;
type Result<T> = std::result::Result<T, DynError>;

fn ci(opts: CiOpts) -> Result<()> {
    // Single-threaded here; nothing else observes the environment.
    unsafe {
        env::set_var("CI", "true");
        env::set_var("KUBECONFIG", workspace().join("kubeconfig"));
        env::set_var("RUST_BACKTRACE", "1");
    }
    let _guard = Kind::new()?;
    wait_for_pods();

    eprintln!("running CI tests");
    let mut test_args = vec![
        "test",
        "--features",
        "test_ci",
        "--",
        "--include-ignored",
    ];
    for v in &opts.pass {
        test_args.push(v);
    }
    let status = Proc::new(env::var_os("CARGO").unwrap_or_else(|| "cargo".into()))
        .args(test_args)
        .current_dir(workspace())
        .status()?;
    if !status.success() {
        return Err("tests failed".into());
    }
    Ok(())
}

struct CiOpts {
    pass: Vec<String>,
}

impl From<&clap::ArgMatches> for CiOpts {
    fn from(m: &clap::ArgMatches) -> Self {
        CiOpts {
            pass: m
                .get_many::<String>("pass")
                .unwrap_or_default()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

fn demo(opts: DemoOpts) -> Result<()> {
    let (mut rd, wr) = UnixStream::pair()?;
    pipe::register(SIGINT, wr)?;

    let cfgpath = workspace().join("kubeconfig");
    eprintln!("putting KUBECONFIG at {cfgpath:?}");
    unsafe { env::set_var("KUBECONFIG", &cfgpath) };
    let guard = Kind::new()?;
    wait_for_pods();

    eprintln!("take it for a spin:");
    eprintln!("\tKUBECONFIG={cfgpath:?} cargo run -p cli -- mod apply <module>");
    eprintln!("^C to tear down");
    let mut _block = [0];
    rd.read_exact(&mut _block)?;

    if opts.keep {
        std::mem::forget(guard);
        eprintln!("cluster kept; delete it with: kind delete cluster --name opm-demo");
    }
    eprintln!();
    Ok(())
}

struct DemoOpts {
    keep: bool,
}

impl From<&clap::ArgMatches> for DemoOpts {
    fn from(m: &clap::ArgMatches) -> Self {
        DemoOpts {
            keep: m.get_flag("keep"),
        }
    }
}

fn wait_for_pods() {
    eprintln!("waiting for pods to ready");
    let _ = Proc::new("kubectl")
        .args([
            "wait",
            "pods",
            "--for=condition=Ready",
            "--timeout=300s",
            "--all",
            "--all-namespaces",
        ])
        .status();
}

struct Kind {
    name: std::ffi::OsString,
}

impl Drop for Kind {
    fn drop(&mut self) {
        let mut cmd = Proc::new("kind");
        cmd.current_dir(workspace());
        cmd.arg("delete");
        cmd.arg("cluster");
        cmd.arg("--name");
        cmd.arg(&self.name);
        let _ = cmd.status();
    }
}

impl Kind {
    fn new() -> Result<Self> {
        let kind_name = if env::var_os("CI").is_some() {
            "ci"
        } else {
            "opm-demo"
        };
        let mut cmd = Proc::new("kind");
        cmd.current_dir(workspace());
        cmd.stdout(Stdio::inherit());
        cmd.arg("create");
        cmd.arg("cluster");
        cmd.arg("--name");
        cmd.arg(kind_name);
        let status = cmd.status()?;
        if !status.success() {
            return Err("kind exit non-zero".into());
        }
        Ok(Self {
            name: kind_name.into(),
        })
    }
}

fn workspace() -> PathBuf {
    Path::new(&env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(1)
        .unwrap()
        .to_path_buf()
}
