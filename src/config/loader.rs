//! Configuration loader.
//!
//! Pipeline:
//! 1. Size check and read, stripping a UTF-8 BOM
//! 2. Environment variable expansion on the raw text
//! 3. YAML parsing into [`SortieConfig`]
//! 4. Validation, with warnings returned to the caller
//! 5. Freeze with `Arc`

use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;
use std::sync::Arc;

use crate::config::schema::SortieConfig;
use crate::config::validation::Validator;
use crate::error::ConfigError;

// ============================================================================
// Public API
// ============================================================================

/// Default limit on the configuration file size (1 MiB).
pub const DEFAULT_MAX_CONFIG_SIZE: usize = 1024 * 1024;

/// Options for the configuration loader.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Maximum configuration file size in bytes.
    pub max_config_size: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            max_config_size: env_or("SORTIE_MAX_CONFIG_SIZE", DEFAULT_MAX_CONFIG_SIZE),
        }
    }
}

/// Result of loading a configuration file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated configuration.
    pub config: Arc<SortieConfig>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during configuration loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} ({location})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Loads `sortie.yaml` files into a frozen [`SortieConfig`].
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    #[must_use]
    pub const fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file is missing, unreadable or over the size limit
    /// - A required environment variable is unset
    /// - YAML parsing fails
    /// - Validation reports errors
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        let file_size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if file_size > self.options.max_config_size {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{file_size} bytes"),
                expected: format!("at most {} bytes", self.options.max_config_size),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        self.load_str(&raw, path)
    }

    /// Runs the pipeline on text already in memory. `path` labels errors.
    ///
    /// # Errors
    ///
    /// Same as [`ConfigLoader::load`], minus the file checks.
    pub fn load_str(&self, raw: &str, path: &Path) -> Result<LoadResult, ConfigError> {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

        let mut env = EnvSubstitution::new(path);
        let expanded = env.substitute(raw)?;
        let mut warnings = env.warnings;

        // An empty file is a valid, all-defaults configuration.
        let config: SortieConfig = if expanded.trim().is_empty() {
            SortieConfig::default()
        } else {
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?
        };

        let result = Validator::new().validate(&config);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: path.display().to_string(),
                errors: result.errors,
            });
        }

        warnings.extend(result.warnings.into_iter().map(|issue| LoadWarning {
            message: issue.message,
            location: Some(issue.path),
        }));

        Ok(LoadResult {
            config: Arc::new(config),
            warnings,
        })
    }
}

// ============================================================================
// Environment Substitution
// ============================================================================

/// What to do when a referenced variable is unset.
enum Fallback {
    /// Expand to the empty string and warn.
    Empty,
    /// `${VAR:-default}`
    Default(String),
    /// `${VAR:?message}`
    Required(String),
}

/// Expands `${...}` references in raw YAML text before parsing, so expanded
/// values still go through YAML type inference.
///
/// Supports:
/// - `${VAR}`: the value, or empty with a warning if unset
/// - `${VAR:-default}`: the value, or `default`
/// - `${VAR:?message}`: the value, or fail with `message`
/// - `$$`: a literal `$`
struct EnvSubstitution<'a> {
    source: &'a Path,
    warnings: Vec<LoadWarning>,
}

impl<'a> EnvSubstitution<'a> {
    const fn new(source: &'a Path) -> Self {
        Self {
            source,
            warnings: Vec::new(),
        }
    }

    fn substitute(&mut self, raw: &str) -> Result<String, ConfigError> {
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    out.push('$');
                }
                Some('{') => {
                    chars.next();
                    let (name, fallback) = self.parse_reference(&mut chars)?;
                    if let Ok(value) = std::env::var(&name) {
                        out.push_str(&value);
                        continue;
                    }
                    match fallback {
                        Fallback::Default(value) => out.push_str(&value),
                        Fallback::Required(message) => {
                            return Err(ConfigError::EnvVarNotSet {
                                var: name,
                                location: message,
                            });
                        }
                        Fallback::Empty => self.warnings.push(LoadWarning {
                            message: format!(
                                "environment variable '{name}' is not set, using empty string"
                            ),
                            location: Some(self.source.display().to_string()),
                        }),
                    }
                }
                _ => out.push(c),
            }
        }

        Ok(out)
    }

    /// Parses the inside of `${...}` after the opening brace.
    fn parse_reference(&self, chars: &mut Peekable<Chars>) -> Result<(String, Fallback), ConfigError> {
        let mut name = String::new();

        while let Some(c) = chars.next() {
            match c {
                '}' => return Ok((name, Fallback::Empty)),
                ':' if chars.peek() == Some(&'-') => {
                    chars.next();
                    let value = self.read_until_close(chars, &name)?;
                    return Ok((name, Fallback::Default(value)));
                }
                ':' if chars.peek() == Some(&'?') => {
                    chars.next();
                    let message = self.read_until_close(chars, &name)?;
                    return Ok((name, Fallback::Required(message)));
                }
                _ => name.push(c),
            }
        }

        Err(self.unclosed(&name))
    }

    /// Reads up to the matching `}`, keeping nested braces.
    fn read_until_close(&self, chars: &mut Peekable<Chars>, name: &str) -> Result<String, ConfigError> {
        let mut value = String::new();
        let mut depth = 1usize;

        for c in chars.by_ref() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(value);
                    }
                }
                _ => {}
            }
            value.push(c);
        }

        Err(self.unclosed(name))
    }

    fn unclosed(&self, name: &str) -> ConfigError {
        ConfigError::ParseError {
            path: self.source.to_path_buf(),
            line: None,
            message: format!("unclosed environment variable reference: ${{{name}"),
        }
    }
}

/// Parses an environment variable, falling back to `default`.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
