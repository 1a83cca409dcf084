//! Command-line grammar. Options use the platform's single-dash forms
//! (`-L`, `-AJ`, `-run_notepad`), matched case-insensitively; unknown or
//! malformed arguments abort startup with a diagnostic.

use std::path::PathBuf;

use thiserror::Error;

pub const TITLE_PREFIX_MAX: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("unknown option: {0}")]
    UnknownOption(String),

    #[error("option {0} requires a value")]
    MissingValue(String),

    #[error("invalid value for {option}: {value}")]
    BadValue { option: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    /// `-L`: left-panel path.
    pub left: Option<String>,
    /// `-R`: right-panel path.
    pub right: Option<String>,
    /// `-A`: active-panel path.
    pub active: Option<String>,
    /// `-AJ`: active-panel path in user-hot-path syntax.
    pub active_hot: Option<String>,
    /// `-C`: load configuration from this file.
    pub config_file: Option<PathBuf>,
    /// `-I`: main-window icon index, 0..=3.
    pub icon_index: Option<u8>,
    /// `-T`: title-bar prefix, at most [`TITLE_PREFIX_MAX`] characters.
    pub title_prefix: Option<String>,
    /// `-O`: force single-instance behavior.
    pub force_single_instance: bool,
    /// `-P`: active panel, 0 = last, 1 = left, 2 = right.
    pub activate_panel: Option<u8>,
    /// `-run_notepad`: open a file in notepad and exit (post-install hook).
    pub run_notepad: Option<PathBuf>,
}

pub fn parse_args<I, S>(args: I) -> Result<CliOptions, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    fn value_of(
        iter: &mut impl Iterator<Item = String>,
        option: &str,
    ) -> Result<String, CliError> {
        iter.next()
            .ok_or_else(|| CliError::MissingValue(option.to_string()))
    }

    let mut out = CliOptions::default();
    let mut iter = args.into_iter().map(Into::into);

    while let Some(arg) = iter.next() {
        let Some(option) = arg.strip_prefix('-') else {
            return Err(CliError::UnknownOption(arg));
        };
        match option.to_ascii_lowercase().as_str() {
            "l" => out.left = Some(value_of(&mut iter, "-L")?),
            "r" => out.right = Some(value_of(&mut iter, "-R")?),
            "a" => out.active = Some(value_of(&mut iter, "-A")?),
            "aj" => out.active_hot = Some(value_of(&mut iter, "-AJ")?),
            "c" => out.config_file = Some(PathBuf::from(value_of(&mut iter, "-C")?)),
            "i" => {
                let value = value_of(&mut iter, "-I")?;
                out.icon_index = Some(parse_bounded(&value, "-I", 3)?);
            }
            "t" => {
                let value = value_of(&mut iter, "-T")?;
                if value.chars().count() > TITLE_PREFIX_MAX {
                    return Err(CliError::BadValue {
                        option: "-T".to_string(),
                        value,
                    });
                }
                out.title_prefix = Some(value);
            }
            "o" => out.force_single_instance = true,
            "p" => {
                let value = value_of(&mut iter, "-P")?;
                out.activate_panel = Some(parse_bounded(&value, "-P", 2)?);
            }
            "run_notepad" => {
                out.run_notepad = Some(PathBuf::from(value_of(&mut iter, "-run_notepad")?));
            }
            _ => return Err(CliError::UnknownOption(arg)),
        }
    }
    Ok(out)
}

fn parse_bounded(value: &str, option: &str, max: u8) -> Result<u8, CliError> {
    value
        .parse::<u8>()
        .ok()
        .filter(|v| *v <= max)
        .ok_or_else(|| CliError::BadValue {
            option: option.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_paths_and_flags() {
        let opts = parse_args(["-L", "C:\\left", "-r", "D:\\right", "-O", "-P", "2"]).unwrap();
        assert_eq!(opts.left.as_deref(), Some("C:\\left"));
        assert_eq!(opts.right.as_deref(), Some("D:\\right"));
        assert!(opts.force_single_instance);
        assert_eq!(opts.activate_panel, Some(2));
    }

    #[test]
    fn hot_path_form_is_distinct_from_plain_active() {
        let opts = parse_args(["-AJ", "2"]).unwrap();
        assert_eq!(opts.active_hot.as_deref(), Some("2"));
        assert_eq!(opts.active, None);
    }

    #[test]
    fn unknown_and_malformed_arguments_abort() {
        assert_eq!(
            parse_args(["-X"]),
            Err(CliError::UnknownOption("-X".to_string()))
        );
        assert_eq!(
            parse_args(["stray"]),
            Err(CliError::UnknownOption("stray".to_string()))
        );
        assert_eq!(
            parse_args(["-L"]),
            Err(CliError::MissingValue("-L".to_string()))
        );
        assert!(matches!(
            parse_args(["-I", "7"]),
            Err(CliError::BadValue { .. })
        ));
        let long_title = "t".repeat(TITLE_PREFIX_MAX + 1);
        assert!(matches!(
            parse_args(["-T".to_string(), long_title]),
            Err(CliError::BadValue { .. })
        ));
    }

    #[test]
    fn notepad_hook() {
        let opts = parse_args(["-run_notepad", "C:\\readme.txt"]).unwrap();
        assert_eq!(
            opts.run_notepad,
            Some(PathBuf::from("C:\\readme.txt"))
        );
    }
}
