//! The adaptive-mode flag recognizer
//!
//! Exactly one literal flag is understood here. Everything else is handed
//! back, in order, for the regular command-line parser.

use tracing::debug;

use crate::config::AdaptiveConfig;

/// Literal flag that switches adaptive execution on
pub const OPTIMIZE_FLAG: &str = "--optimize";

/// Apply `option` to `config` if it is the adaptive flag.
pub fn parse_adaptive_option(option: &str, config: &mut AdaptiveConfig) -> bool {
    if option == OPTIMIZE_FLAG {
        config.set_enabled(true);
        debug!(option, "Adaptive execution enabled");
        true
    } else {
        false
    }
}

/// Consume the adaptive flag from `args` and return the rest.
///
/// The first element is the program name; it is never interpreted and is
/// always passed through.
pub fn handle_adaptive_options<I, S>(args: I, config: &mut AdaptiveConfig) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut args = args.into_iter().map(Into::into);
    let mut rest: Vec<String> = args.next().into_iter().collect();

    for arg in args {
        if !parse_adaptive_option(&arg, config) {
            rest.push(arg);
        }
    }
    rest
}

pub fn adaptive_options_help() -> String {
    format!(
        "Adaptive execution options:\n  {:<20}Enable adaptive execution mode\n",
        OPTIMIZE_FLAG
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_the_literal_flag_is_recognized() {
        let mut config = AdaptiveConfig::default();
        assert!(!parse_adaptive_option("--optimise", &mut config));
        assert!(!parse_adaptive_option("--OPTIMIZE", &mut config));
        assert!(!parse_adaptive_option("--optimize=1", &mut config));
        assert!(!config.enabled);

        assert!(parse_adaptive_option("--optimize", &mut config));
        assert!(config.enabled);
    }

    #[test]
    fn test_unrecognized_arguments_pass_through_in_order() {
        let mut config = AdaptiveConfig::default();
        let rest = handle_adaptive_options(
            ["rustmap-adaptive", "-p", "22,80", "--optimize", "10.0.0.1", "--workers", "4"],
            &mut config,
        );

        assert!(config.enabled);
        assert_eq!(
            rest,
            vec!["rustmap-adaptive", "-p", "22,80", "10.0.0.1", "--workers", "4"]
        );
    }

    #[test]
    fn test_program_name_is_never_interpreted() {
        let mut config = AdaptiveConfig::default();
        let rest = handle_adaptive_options(["--optimize"], &mut config);
        assert!(!config.enabled);
        assert_eq!(rest, vec!["--optimize"]);

        let rest = handle_adaptive_options(Vec::<String>::new(), &mut config);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_help_mentions_flag() {
        assert!(adaptive_options_help().contains("--optimize"));
    }
}
