//! Pattern-driven remediation of configure/build failures
//!
//! Each rule pairs an error-text regex with flags to append, flags to
//! remove and pre-commands to run before the next configure attempt.
//! Actions only ever grow the three lists, so repeated application over
//! the same output reaches a fixed point.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A remediation rule as it appears in configuration (`[[remediation]]`).
///
/// Action strings may reference capture groups of `pattern` (`$1`, `${name}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationRule {
    pub pattern: String,
    #[serde(default)]
    pub append: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl RemediationRule {
    fn new(pattern: &str, append: &[&str], remove: &[&str], commands: &[&str]) -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            pattern: pattern.to_string(),
            append: owned(append),
            remove: owned(remove),
            commands: owned(commands),
        }
    }
}

/// Built-in remediation table.
///
/// The Werror and policy-minimum entries can fire on warnings that were not
/// the actual cause of the failure; they cost one extra attempt at worst.
pub fn default_rules() -> Vec<RemediationRule> {
    vec![
        RemediationRule::new(
            r"Compatibility with CMake < 3\.\d+ has been removed",
            &["-DCMAKE_POLICY_VERSION_MINIMUM=3.5"],
            &[],
            &[],
        ),
        RemediationRule::new(
            r"(?:all warnings being treated as errors|\[-Werror[=,\]])",
            &["-DCMAKE_COMPILE_WARNING_AS_ERROR=OFF", "-DCMAKE_CXX_FLAGS=-Wno-error"],
            &["-DWARNINGS_AS_ERRORS", "-DENABLE_WERROR"],
            &[],
        ),
        RemediationRule::new(
            r"(?:requires? (?:at least )?C\+\+(17|20)|'std::(?:optional|string_view|variant)' (?:has not been declared|is not a member))",
            &["-DCMAKE_CXX_STANDARD=17"],
            &[],
            &[],
        ),
        RemediationRule::new(
            r"The source directory\s+\S+\s+does not contain a CMakeLists\.txt",
            &[],
            &[],
            &["git submodule update --init --recursive"],
        ),
        RemediationRule::new(
            r"(?:does not contain a CMakeLists\.txt file|Could not find git|git: command not found)",
            &[],
            &[],
            &["apt-get install -y git", "git submodule update --init --recursive"],
        ),
        RemediationRule::new(
            r"No CMAKE_CXX_COMPILER could be found",
            &[],
            &[],
            &["apt-get install -y g++"],
        ),
        RemediationRule::new(
            r"Could NOT find Threads",
            &["-DTHREADS_PREFER_PTHREAD_FLAG=ON"],
            &[],
            &[],
        ),
        RemediationRule::new(
            r"unrecognized command[- ]line option '(-m[\w=.-]+)'",
            &[],
            &["-DENABLE_NATIVE", "-DUSE_NATIVE_ARCH"],
            &[],
        ),
        RemediationRule::new(
            r"(?:undefined reference to `__asan_|cannot find -lasan)",
            &["-DENABLE_SANITIZERS=OFF"],
            &["-DENABLE_SANITIZERS=ON", "-DUSE_SANITIZER"],
            &[],
        ),
        RemediationRule::new(
            r"ccache: (?:command )?not found",
            &["-DCMAKE_CXX_COMPILER_LAUNCHER="],
            &[],
            &[],
        ),
    ]
}

/// Live remediation state carried through the configure/build retry loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remediations {
    pub append: Vec<String>,
    pub remove: Vec<String>,
    pub commands: Vec<String>,
}

impl Remediations {
    /// Append/remove applied to a configure argv.
    ///
    /// A remove entry drops exact matches and `<entry>=...` assignments.
    pub fn apply_to(&self, argv: &[String]) -> Vec<String> {
        let mut out: Vec<String> = argv
            .iter()
            .filter(|arg| !self.remove.iter().any(|r| matches_flag(arg, r)))
            .cloned()
            .collect();
        for flag in &self.append {
            if !self.remove.iter().any(|r| matches_flag(flag, r)) && !out.contains(flag) {
                out.push(flag.clone());
            }
        }
        out
    }

    fn push_unique(list: &mut Vec<String>, item: String) -> bool {
        if list.contains(&item) {
            false
        } else {
            list.push(item);
            true
        }
    }
}

fn matches_flag(arg: &str, remove: &str) -> bool {
    arg == remove
        || arg
            .strip_prefix(remove)
            .is_some_and(|rest| rest.starts_with('='))
}

/// Compiled remediation table.
#[derive(Debug, Clone)]
pub struct FlagResolver {
    rules: Vec<(Regex, RemediationRule)>,
}

impl FlagResolver {
    pub fn new(rules: Vec<RemediationRule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let re = Regex::new(&rule.pattern)
                    .with_context(|| format!("Invalid remediation pattern: {}", rule.pattern))?;
                Ok((re, rule))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(default_rules())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Scan configure+build output and grow `state`.
    ///
    /// Returns true when at least one new element was added.
    pub fn apply(&self, output: &str, state: &mut Remediations) -> bool {
        let mut changed = false;
        for (re, rule) in &self.rules {
            let Some(caps) = re.captures(output) else {
                continue;
            };
            let expand = |template: &String| {
                let mut dst = String::new();
                caps.expand(template, &mut dst);
                dst
            };
            for flag in rule.append.iter().map(expand) {
                changed |= Remediations::push_unique(&mut state.append, flag);
            }
            for flag in rule.remove.iter().map(expand) {
                changed |= Remediations::push_unique(&mut state.remove, flag);
            }
            for command in rule.commands.iter().map(expand) {
                changed |= Remediations::push_unique(&mut state.commands, command);
            }
            tracing::debug!("remediation rule matched: {}", rule.pattern);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_table_compiles() {
        let resolver = FlagResolver::with_defaults().unwrap();
        assert_eq!(resolver.len(), default_rules().len());
    }

    #[test]
    fn test_werror_rule() {
        let resolver = FlagResolver::with_defaults().unwrap();
        let mut state = Remediations::default();
        let output = "foo.cpp:12: error: unused variable 'x' [-Werror=unused-variable]\n\
                      cc1plus: all warnings being treated as errors";
        assert!(resolver.apply(output, &mut state));
        assert!(state
            .append
            .contains(&"-DCMAKE_COMPILE_WARNING_AS_ERROR=OFF".to_string()));
        assert!(state.remove.contains(&"-DWARNINGS_AS_ERRORS".to_string()));
    }

    #[test]
    fn test_fixed_point_on_repeated_output() {
        let resolver = FlagResolver::with_defaults().unwrap();
        let mut state = Remediations::default();
        let output = "CMake Error: Compatibility with CMake < 3.5 has been removed from CMake.";
        assert!(resolver.apply(output, &mut state));
        let snapshot = state.clone();
        assert!(!resolver.apply(output, &mut state));
        assert_eq!(state, snapshot);
    }

    #[test]
    fn test_capture_expansion() {
        let rule = RemediationRule::new(r"missing option (\w+)", &["-D$1=ON"], &[], &[]);
        let resolver = FlagResolver::new(vec![rule]).unwrap();
        let mut state = Remediations::default();
        resolver.apply("error: missing option FOO_BAR", &mut state);
        assert_eq!(state.append, argv(&["-DFOO_BAR=ON"]));
    }

    #[test]
    fn test_apply_to_removes_assignments() {
        let state = Remediations {
            append: argv(&["-DCMAKE_CXX_STANDARD=17"]),
            remove: argv(&["-DWARNINGS_AS_ERRORS"]),
            commands: vec![],
        };
        let out = state.apply_to(&argv(&["cmake", "-DWARNINGS_AS_ERRORS=ON", "-DFOO=ON"]));
        assert_eq!(out, argv(&["cmake", "-DFOO=ON", "-DCMAKE_CXX_STANDARD=17"]));
    }

    #[test]
    fn test_submodule_command() {
        let resolver = FlagResolver::with_defaults().unwrap();
        let mut state = Remediations::default();
        resolver.apply(
            "CMake Error at CMakeLists.txt:40 (add_subdirectory):\n  The source directory\n\n    /w/third_party/googletest\n\n  does not contain a CMakeLists.txt file.",
            &mut state,
        );
        assert!(state
            .commands
            .contains(&"git submodule update --init --recursive".to_string()));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let rule = RemediationRule::new("(unclosed", &[], &[], &[]);
        assert!(FlagResolver::new(vec![rule]).is_err());
    }
}
