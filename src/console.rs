//! Anchor identity assignment over a text console
//!
//! An anchor accepts `SETID <n>` on its console. A valid identity is written
//! to non-volatile storage and the anchor restarts to pick it up; anything
//! else is rejected with a diagnostic and leaves the stored identity alone.

use core::fmt::{self, Debug, Display, Formatter};

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{error::ConfigError, slot::AnchorId};

/// Non-volatile storage for the anchor identity
pub trait IdentityStore {
    /// Error reported by the storage backend
    type Error: Debug;

    /// Reads the stored identity, if one was ever written
    ///
    /// Returns the raw byte; validation is up to the caller.
    fn load(&mut self) -> Result<Option<u8>, Self::Error>;

    /// Persists `id`
    fn store(&mut self, id: AnchorId) -> Result<(), Self::Error>;
}

/// A parsed console command
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Command {
    /// Assign a new anchor identity
    SetId(u8),
}

/// Why a console line is not a valid command
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum CommandError {
    /// The verb is not known
    UnknownCommand,
    /// `SETID` without a number
    MissingArgument,
    /// The argument is not a number that fits in a byte
    InvalidNumber,
    /// More than one argument
    TrailingInput,
}

impl Command {
    /// Parses one console line
    ///
    /// The verb is case-insensitive; surrounding whitespace is ignored.
    /// Returns `Ok(None)` for blank lines.
    pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
        let mut words = line.split_whitespace();

        let verb = match words.next() {
            Some(verb) => verb,
            None => return Ok(None),
        };
        if !verb.eq_ignore_ascii_case("SETID") {
            return Err(CommandError::UnknownCommand);
        }

        let argument = words.next().ok_or(CommandError::MissingArgument)?;
        let id = argument
            .parse::<u8>()
            .map_err(|_| CommandError::InvalidNumber)?;

        if words.next().is_some() {
            return Err(CommandError::TrailingInput);
        }

        Ok(Some(Command::SetId(id)))
    }
}

/// What the console wants the device to do next
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum ConsoleReply {
    /// Nothing to do
    Ignored,
    /// The identity was stored; restart to use it
    Restart(AnchorId),
}

/// A rejected console line
#[derive(Clone, Copy, Eq, PartialEq)]
pub enum ConsoleError<E> {
    /// The line is not a valid command
    Command(CommandError),
    /// The identity is out of range
    Identity(ConfigError),
    /// The storage backend failed
    Store(E),
}

impl<E> From<CommandError> for ConsoleError<E> {
    fn from(error: CommandError) -> Self {
        ConsoleError::Command(error)
    }
}

impl<E> Debug for ConsoleError<E>
where
    E: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleError::Command(error) => write!(f, "Command({:?})", error),
            ConsoleError::Identity(error) => write!(f, "Identity({:?})", error),
            ConsoleError::Store(error) => write!(f, "Store({:?})", error),
        }
    }
}

impl<E> Display for ConsoleError<E>
where
    E: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleError::Command(CommandError::UnknownCommand) => {
                write!(f, "unknown command, expected SETID <n>")
            }
            ConsoleError::Command(CommandError::MissingArgument) => {
                write!(f, "SETID: missing anchor id")
            }
            ConsoleError::Command(CommandError::InvalidNumber) => {
                write!(f, "SETID: anchor id is not a number")
            }
            ConsoleError::Command(CommandError::TrailingInput) => {
                write!(f, "SETID: expected a single anchor id")
            }
            ConsoleError::Identity(error) => write!(f, "SETID: {}", error),
            ConsoleError::Store(error) => write!(f, "SETID: failed to store id: {:?}", error),
        }
    }
}

#[cfg(feature = "std")]
impl<E> std::error::Error for ConsoleError<E> where E: Debug {}

/// Handles one console line
///
/// On `SETID` with a valid identity, stores it and asks for a restart. An
/// out-of-range identity is rejected before the store is touched.
pub fn handle_line<S>(line: &str, store: &mut S) -> Result<ConsoleReply, ConsoleError<S::Error>>
where
    S: IdentityStore,
{
    let command = match Command::parse(line)? {
        Some(command) => command,
        None => return Ok(ConsoleReply::Ignored),
    };

    match command {
        Command::SetId(raw) => {
            let id = AnchorId::new(raw).map_err(|error| {
                twr_warn!("rejected anchor id {}", raw);
                ConsoleError::Identity(error)
            })?;

            store.store(id).map_err(ConsoleError::Store)?;
            twr_info!("anchor id set to {}, restarting", id.get());

            Ok(ConsoleReply::Restart(id))
        }
    }
}

/// Reads the identity to boot with
///
/// Falls back to `default` when nothing was stored or the stored value is out
/// of range.
pub fn load_identity<S>(store: &mut S, default: AnchorId) -> Result<AnchorId, S::Error>
where
    S: IdentityStore,
{
    match store.load()? {
        Some(raw) => Ok(AnchorId::new(raw).unwrap_or_else(|_| {
            twr_warn!("stored anchor id {} out of range, using {}", raw, default.get());
            default
        })),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        stored: Option<u8>,
        writes: u32,
        broken: bool,
    }

    impl IdentityStore for MemoryStore {
        type Error = &'static str;

        fn load(&mut self) -> Result<Option<u8>, Self::Error> {
            Ok(self.stored)
        }

        fn store(&mut self, id: AnchorId) -> Result<(), Self::Error> {
            if self.broken {
                return Err("flash write failed");
            }
            self.stored = Some(id.get());
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn parses_setid() {
        assert_eq!(Command::parse("SETID 5"), Ok(Some(Command::SetId(5))));
        assert_eq!(Command::parse("  setid\t12 \r\n"), Ok(Some(Command::SetId(12))));
        assert_eq!(Command::parse(""), Ok(None));
        assert_eq!(Command::parse("SETID"), Err(CommandError::MissingArgument));
        assert_eq!(Command::parse("SETID x"), Err(CommandError::InvalidNumber));
        assert_eq!(Command::parse("SETID 256"), Err(CommandError::InvalidNumber));
        assert_eq!(Command::parse("SETID 1 2"), Err(CommandError::TrailingInput));
        assert_eq!(Command::parse("RESET"), Err(CommandError::UnknownCommand));
    }

    #[test]
    fn valid_id_is_stored_and_restarts() {
        let mut store = MemoryStore::default();

        let reply = handle_line("SETID 7", &mut store);

        assert_eq!(reply, Ok(ConsoleReply::Restart(AnchorId::new(7).unwrap())));
        assert_eq!(store.stored, Some(7));
    }

    #[test]
    fn out_of_range_id_leaves_store_untouched() {
        let mut store = MemoryStore {
            stored: Some(3),
            ..MemoryStore::default()
        };

        for line in ["SETID 0", "SETID 21"] {
            let error = handle_line(line, &mut store).unwrap_err();
            assert!(matches!(
                error,
                ConsoleError::Identity(ConfigError::IdentityOutOfRange(_))
            ));
        }

        assert_eq!(store.stored, Some(3));
        assert_eq!(store.writes, 0);
    }

    #[test]
    fn diagnostics_are_readable() {
        let mut store = MemoryStore::default();

        let error = handle_line("SETID 42", &mut store).unwrap_err();

        assert_eq!(
            std::format!("{}", error),
            "SETID: anchor id 42 out of range [1, 20]"
        );
    }

    #[test]
    fn storage_failure_is_reported() {
        let mut store = MemoryStore {
            broken: true,
            ..MemoryStore::default()
        };

        assert_eq!(
            handle_line("SETID 2", &mut store),
            Err(ConsoleError::Store("flash write failed"))
        );
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(
            handle_line("   ", &mut MemoryStore::default()),
            Ok(ConsoleReply::Ignored)
        );
    }

    #[test]
    fn boot_identity_falls_back_to_default() {
        let default = AnchorId::new(1).unwrap();

        let mut empty = MemoryStore::default();
        assert_eq!(load_identity(&mut empty, default), Ok(default));

        let mut corrupt = MemoryStore {
            stored: Some(0xFF),
            ..MemoryStore::default()
        };
        assert_eq!(load_identity(&mut corrupt, default), Ok(default));

        let mut assigned = MemoryStore {
            stored: Some(9),
            ..MemoryStore::default()
        };
        assert_eq!(
            load_identity(&mut assigned, default),
            Ok(AnchorId::new(9).unwrap())
        );
    }
}
