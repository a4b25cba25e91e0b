//! Command and option compatibility rules
//!
//! Every tool command takes a fixed set of options; everything else is
//! forbidden. The rules live in one declarative table and are checked
//! generically, so adding a command means adding a row, not another
//! validation ladder.

use std::fmt;

/// The mutually exclusive tool commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCommand {
    /// `-D` delete a key
    Delete,
    /// `-H` print usage
    Help,
    /// `-I` generate a transport key from typed-in shares
    InputGenerateTransport,
    /// `-K` display a key's check value
    DisplayKcv,
    /// `-L` list keys
    ListKeys,
    /// `-M` generate a master key
    GenerateMaster,
    /// `-N` create new key databases
    NewDatabases,
    /// `-P` change the database password
    ChangePassword,
    /// `-R` rename a key
    Rename,
    /// `-S` list security modules
    ListSecurityModules,
    /// `-T` generate a transport key from drawn shares
    GenerateTransport,
    /// `-U` unwrap a master key from a file
    Unwrap,
    /// `-V` print the tool version
    Version,
    /// `-W` wrap a master key to a file
    Wrap,
}

impl ToolCommand {
    /// The command letter as typed on the command line
    pub const fn letter(self) -> char {
        match self {
            Self::Delete => 'D',
            Self::Help => 'H',
            Self::InputGenerateTransport => 'I',
            Self::DisplayKcv => 'K',
            Self::ListKeys => 'L',
            Self::GenerateMaster => 'M',
            Self::NewDatabases => 'N',
            Self::ChangePassword => 'P',
            Self::Rename => 'R',
            Self::ListSecurityModules => 'S',
            Self::GenerateTransport => 'T',
            Self::Unwrap => 'U',
            Self::Version => 'V',
            Self::Wrap => 'W',
        }
    }
}

/// The tool options, one per letter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opt {
    /// `-d` database directory
    DbDir,
    /// `-f` password file
    PwFile,
    /// `-h` security module / token name
    Token,
    /// `-i` input file
    InFile,
    /// `-n` key nickname
    KeyName,
    /// `-o` output file
    OutFile,
    /// `-p` database filename prefix
    Prefix,
    /// `-r` new key nickname
    NewKeyName,
    /// `-t` transport key nickname
    TransportKeyName,
    /// `-x` open mode (readwrite)
    ReadWrite,
    /// `-z` noise file for share entropy
    NoiseFile,
    /// `-s` store key non-exportable
    NonExportable,
    /// `-a` algorithm (AES|DES)
    Algorithm,
    /// `-l` key length in bits
    KeyLen,
}

impl fmt::Display for Opt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Self::DbDir => 'd',
            Self::PwFile => 'f',
            Self::Token => 'h',
            Self::InFile => 'i',
            Self::KeyName => 'n',
            Self::OutFile => 'o',
            Self::Prefix => 'p',
            Self::NewKeyName => 'r',
            Self::TransportKeyName => 't',
            Self::ReadWrite => 'x',
            Self::NoiseFile => 'z',
            Self::NonExportable => 's',
            Self::Algorithm => 'a',
            Self::KeyLen => 'l',
        };
        write!(f, "-{letter}")
    }
}

/// One row of the compatibility table
#[derive(Debug)]
pub struct Rule {
    /// The command this row governs
    pub command: ToolCommand,
    /// Options that must be present
    pub required: &'static [Opt],
    /// Options that may be present on top of the required set
    pub optional: &'static [Opt],
}

impl Rule {
    /// Whether `opt` is acceptable for this command at all
    fn allows(&self, opt: Opt) -> bool {
        self.required.contains(&opt) || self.optional.contains(&opt)
    }
}

use Opt::*;

/// Options every database-touching command may carry
const DB_COMMON: &[Opt] = &[PwFile, Prefix, Token, ReadWrite];

/// The compatibility table. Forbidden = not required and not optional.
pub const RULES: &[Rule] = &[
    Rule {
        command: ToolCommand::Delete,
        required: &[DbDir, KeyName],
        optional: DB_COMMON,
    },
    Rule {
        command: ToolCommand::Help,
        required: &[],
        optional: &[],
    },
    Rule {
        command: ToolCommand::InputGenerateTransport,
        required: &[DbDir, KeyName, Algorithm],
        optional: &[PwFile, Prefix, Token, ReadWrite, NonExportable],
    },
    Rule {
        command: ToolCommand::DisplayKcv,
        required: &[DbDir, KeyName],
        optional: DB_COMMON,
    },
    Rule {
        command: ToolCommand::ListKeys,
        required: &[DbDir],
        optional: DB_COMMON,
    },
    Rule {
        command: ToolCommand::GenerateMaster,
        required: &[DbDir, KeyName, Algorithm],
        optional: &[PwFile, Prefix, Token, ReadWrite, KeyLen],
    },
    Rule {
        command: ToolCommand::NewDatabases,
        required: &[DbDir],
        optional: &[PwFile, Prefix],
    },
    Rule {
        command: ToolCommand::ChangePassword,
        required: &[DbDir, PwFile],
        optional: &[Prefix, Token, ReadWrite],
    },
    Rule {
        command: ToolCommand::Rename,
        required: &[DbDir, KeyName, NewKeyName],
        optional: DB_COMMON,
    },
    Rule {
        command: ToolCommand::ListSecurityModules,
        required: &[DbDir],
        optional: DB_COMMON,
    },
    Rule {
        command: ToolCommand::GenerateTransport,
        required: &[DbDir, KeyName, Algorithm],
        optional: &[PwFile, Prefix, Token, ReadWrite, NonExportable, NoiseFile],
    },
    Rule {
        command: ToolCommand::Unwrap,
        required: &[DbDir, KeyName, TransportKeyName, InFile],
        optional: DB_COMMON,
    },
    Rule {
        command: ToolCommand::Version,
        required: &[],
        optional: &[],
    },
    Rule {
        command: ToolCommand::Wrap,
        required: &[DbDir, KeyName, TransportKeyName, OutFile],
        optional: DB_COMMON,
    },
];

/// Validate the selected command against the present options.
///
/// Returns a usage-style message naming the offending option when the
/// combination is not in the table.
pub fn validate(command: ToolCommand, present: &[Opt]) -> Result<(), String> {
    let rule = RULES
        .iter()
        .find(|r| r.command == command)
        .expect("every command has a table row");

    for required in rule.required {
        if !present.contains(required) {
            return Err(format!(
                "-{} requires option {}",
                command.letter(),
                required
            ));
        }
    }
    for opt in present {
        if !rule.allows(*opt) {
            return Err(format!(
                "option {} is not valid with -{}",
                opt,
                command.letter()
            ));
        }
    }
    Ok(())
}
