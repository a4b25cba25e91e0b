//! `tktool`: operator tool for token key ceremonies
//!
//! One command letter per invocation, validated against a declarative
//! option compatibility table. All failures exit with status 255 after a
//! message on standard error; success exits 0.

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{Result, bail};
use clap::Parser;

use tokenkit_tps::provider::KeyAlgorithm;

mod commands;
mod opts;
mod store;

use opts::{Opt, ToolCommand};
use store::Database;

const USAGE: &str = "\
Usage: tktool -D|-H|-I|-K|-L|-M|-N|-P|-R|-S|-T|-U|-V|-W [options]

Commands (exactly one):
  -D    delete a key                 -P    change database password
  -H    print this help              -R    rename a key
  -I    generate transport key       -S    list security modules
        from typed-in shares        -T    generate transport key
  -K    display a key check value    -U    unwrap a master key
  -L    list keys                    -V    print version
  -M    generate a master key        -W    wrap a master key
  -N    create new key databases

Options:
  -d dbdir          key database directory
  -f pwfile         database password file
  -h token          security module name
  -i infile         input file (wrapped key)
  -n keyname        key nickname
  -o outfile        output file (wrapped key)
  -p prefix         database filename prefix
  -r newname        new key nickname
  -t transportname  transport key nickname
  -x readwrite      open database read-write
  -z noisefile      entropy file for share generation
  -s                store the key non-exportable
  -a alg            algorithm: AES or DES
  -l keylen         key length in bits";

#[derive(Debug, Parser)]
#[command(
    name = "tktool",
    disable_help_flag = true,
    disable_version_flag = true,
    override_usage = "tktool -D|-H|-I|-K|-L|-M|-N|-P|-R|-S|-T|-U|-V|-W [options]"
)]
struct Cli {
    // command letters, mutually exclusive
    #[arg(short = 'D')]
    delete: bool,
    #[arg(short = 'H')]
    help: bool,
    #[arg(short = 'I')]
    input_generate: bool,
    #[arg(short = 'K')]
    display_kcv: bool,
    #[arg(short = 'L')]
    list_keys: bool,
    #[arg(short = 'M')]
    generate_master: bool,
    #[arg(short = 'N')]
    new_databases: bool,
    #[arg(short = 'P')]
    change_password: bool,
    #[arg(short = 'R')]
    rename: bool,
    #[arg(short = 'S')]
    list_modules: bool,
    #[arg(short = 'T')]
    generate_transport: bool,
    #[arg(short = 'U')]
    unwrap: bool,
    #[arg(short = 'V')]
    version: bool,
    #[arg(short = 'W')]
    wrap: bool,

    // options
    #[arg(short = 'd', value_name = "dbdir")]
    dbdir: Option<PathBuf>,
    #[arg(short = 'f', value_name = "pwfile")]
    pwfile: Option<PathBuf>,
    #[arg(short = 'h', value_name = "token")]
    token: Option<String>,
    #[arg(short = 'i', value_name = "infile")]
    infile: Option<PathBuf>,
    #[arg(short = 'n', value_name = "keyname")]
    keyname: Option<String>,
    #[arg(short = 'o', value_name = "outfile")]
    outfile: Option<PathBuf>,
    #[arg(short = 'p', value_name = "prefix")]
    prefix: Option<String>,
    #[arg(short = 'r', value_name = "newname")]
    new_keyname: Option<String>,
    #[arg(short = 't', value_name = "transportname")]
    transport_keyname: Option<String>,
    #[arg(short = 'x', value_name = "readwrite")]
    readwrite: Option<String>,
    #[arg(short = 'z', value_name = "noisefile")]
    noisefile: Option<PathBuf>,
    #[arg(short = 's')]
    non_exportable: bool,
    #[arg(short = 'a', value_name = "alg")]
    algorithm: Option<String>,
    #[arg(short = 'l', value_name = "keylen")]
    keylen: Option<usize>,

    /// Trace level output
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    /// The single selected command, or an error for zero or several
    fn command(&self) -> Result<ToolCommand> {
        let selected: Vec<ToolCommand> = [
            (self.delete, ToolCommand::Delete),
            (self.help, ToolCommand::Help),
            (self.input_generate, ToolCommand::InputGenerateTransport),
            (self.display_kcv, ToolCommand::DisplayKcv),
            (self.list_keys, ToolCommand::ListKeys),
            (self.generate_master, ToolCommand::GenerateMaster),
            (self.new_databases, ToolCommand::NewDatabases),
            (self.change_password, ToolCommand::ChangePassword),
            (self.rename, ToolCommand::Rename),
            (self.list_modules, ToolCommand::ListSecurityModules),
            (self.generate_transport, ToolCommand::GenerateTransport),
            (self.unwrap, ToolCommand::Unwrap),
            (self.version, ToolCommand::Version),
            (self.wrap, ToolCommand::Wrap),
        ]
        .into_iter()
        .filter_map(|(on, command)| on.then_some(command))
        .collect();

        match selected.as_slice() {
            [one] => Ok(*one),
            [] => bail!("no command given"),
            many => bail!(
                "commands are mutually exclusive: {}",
                many.iter()
                    .map(|c| format!("-{}", c.letter()))
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
        }
    }

    /// The options present on the command line
    fn present_options(&self) -> Vec<Opt> {
        let mut present = Vec::new();
        let pairs: [(bool, Opt); 14] = [
            (self.dbdir.is_some(), Opt::DbDir),
            (self.pwfile.is_some(), Opt::PwFile),
            (self.token.is_some(), Opt::Token),
            (self.infile.is_some(), Opt::InFile),
            (self.keyname.is_some(), Opt::KeyName),
            (self.outfile.is_some(), Opt::OutFile),
            (self.prefix.is_some(), Opt::Prefix),
            (self.new_keyname.is_some(), Opt::NewKeyName),
            (self.transport_keyname.is_some(), Opt::TransportKeyName),
            (self.readwrite.is_some(), Opt::ReadWrite),
            (self.noisefile.is_some(), Opt::NoiseFile),
            (self.non_exportable, Opt::NonExportable),
            (self.algorithm.is_some(), Opt::Algorithm),
            (self.keylen.is_some(), Opt::KeyLen),
        ];
        for (on, opt) in pairs {
            if on {
                present.push(opt);
            }
        }
        present
    }

    fn parsed_algorithm(&self) -> Result<KeyAlgorithm> {
        let raw = self
            .algorithm
            .as_deref()
            .expect("algorithm presence checked by the option table");
        KeyAlgorithm::from_str(raw).map_err(Into::into)
    }

    fn database(&self) -> Database {
        let dbdir = self
            .dbdir
            .as_deref()
            .expect("dbdir presence checked by the option table");
        Database::locate(dbdir, self.prefix.as_deref())
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("tktool: {e}");
            eprintln!("{USAGE}");
            return ExitCode::from(255);
        }
    };

    setup_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tktool: {e:#}");
            ExitCode::from(255)
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let command = match cli.command() {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{USAGE}");
            return Err(e);
        }
    };

    if let Err(message) = opts::validate(command, &cli.present_options()) {
        eprintln!("{USAGE}");
        bail!(message);
    }

    let pwfile = cli.pwfile.as_deref();

    match command {
        ToolCommand::Help => {
            println!("{USAGE}");
            Ok(())
        }
        ToolCommand::Version => {
            println!("tktool {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        ToolCommand::NewDatabases => commands::new_databases(&cli.database(), pwfile),
        ToolCommand::ChangePassword => commands::change_password(
            &cli.database(),
            pwfile.expect("pwfile presence checked by the option table"),
        ),
        ToolCommand::ListKeys => commands::list_keys(&cli.database(), pwfile),
        ToolCommand::ListSecurityModules => {
            commands::list_modules(&cli.database(), pwfile, cli.token.as_deref())
        }
        ToolCommand::Delete => commands::delete(
            &cli.database(),
            pwfile,
            cli.keyname.as_deref().expect("keyname required"),
        ),
        ToolCommand::Rename => commands::rename(
            &cli.database(),
            pwfile,
            cli.keyname.as_deref().expect("keyname required"),
            cli.new_keyname.as_deref().expect("newname required"),
        ),
        ToolCommand::DisplayKcv => commands::display_kcv(
            &cli.database(),
            pwfile,
            cli.keyname.as_deref().expect("keyname required"),
        ),
        ToolCommand::GenerateTransport => commands::generate_transport(
            &cli.database(),
            pwfile,
            cli.keyname.as_deref().expect("keyname required"),
            cli.parsed_algorithm()?,
            cli.non_exportable,
            cli.noisefile.as_deref(),
        ),
        ToolCommand::InputGenerateTransport => commands::input_generate_transport(
            &cli.database(),
            pwfile,
            cli.keyname.as_deref().expect("keyname required"),
            cli.parsed_algorithm()?,
            cli.non_exportable,
        ),
        ToolCommand::GenerateMaster => commands::generate_master(
            &cli.database(),
            pwfile,
            cli.keyname.as_deref().expect("keyname required"),
            cli.parsed_algorithm()?,
            cli.keylen,
        ),
        ToolCommand::Wrap => commands::wrap(
            &cli.database(),
            pwfile,
            cli.transport_keyname.as_deref().expect("transportname required"),
            cli.keyname.as_deref().expect("keyname required"),
            cli.outfile.as_deref().expect("outfile required"),
        ),
        ToolCommand::Unwrap => commands::unwrap(
            &cli.database(),
            pwfile,
            cli.transport_keyname.as_deref().expect("transportname required"),
            cli.keyname.as_deref().expect("keyname required"),
            cli.infile.as_deref().expect("infile required"),
        ),
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}
