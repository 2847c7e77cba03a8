use std::collections::BTreeMap;

/// Rewrites the leading token of a command to a different invocation.
///
/// Used for package-manager front-ends whose executable name differs from
/// the word people type (for example the `.cmd` shims on Windows).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    entries: BTreeMap<String, Vec<String>>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform defaults.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        if cfg!(windows) {
            for tool in ["npm", "npx", "yarn", "pnpm"] {
                table.insert(tool, vec![format!("{tool}.cmd")]);
            }
        }
        table
    }

    /// Builtin entries extended (and overridden) by user-configured ones.
    pub fn with_overrides(overrides: &BTreeMap<String, Vec<String>>) -> Self {
        let mut table = Self::builtin();
        for (name, argv) in overrides {
            table.insert(name, argv.clone());
        }
        table
    }

    pub fn insert(&mut self, name: &str, argv: Vec<String>) {
        self.entries.insert(name.to_owned(), argv);
    }

    pub fn lookup(&self, token: &str) -> Option<&[String]> {
        self.entries.get(token).map(Vec::as_slice)
    }

    /// Rewrite the first word of a shell command line.
    ///
    /// The replacement words are quoted for the shell; the rest of the line,
    /// including its leading whitespace, is kept verbatim.
    pub fn resolve_line(&self, line: &str) -> String {
        let trimmed = line.trim_start();
        let split = trimmed
            .find(char::is_whitespace)
            .unwrap_or(trimmed.len());
        let (head, rest) = trimmed.split_at(split);
        match self.lookup(head) {
            Some(argv) => {
                let words: Vec<String> = argv.iter().map(|w| shell_quote(w)).collect();
                format!("{}{rest}", words.join(" "))
            }
            None => line.to_owned(),
        }
    }

    /// Rewrite the program of an argument vector.
    pub fn resolve_argv(&self, argv: &[String]) -> Vec<String> {
        match argv.split_first() {
            Some((program, rest)) => match self.lookup(program) {
                Some(replacement) => replacement.iter().chain(rest).cloned().collect(),
                None => argv.to_vec(),
            },
            None => Vec::new(),
        }
    }
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '@' | '%' | '+' | '=' | ',')
}

/// Quote a single word for the platform shell, leaving plain words untouched.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty() && word.chars().all(is_shell_safe) {
        return word.to_owned();
    }
    if cfg!(windows) {
        format!("\"{}\"", word.replace('"', "\"\""))
    } else {
        // Single-quoting in POSIX shell: replace ' with '\'' then wrap in '
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}
