use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::JudgeError;

/// Builds an argv from the path of the source file.
pub type CommandBuilder = fn(&Path) -> Vec<String>;

/// Languages the traditional judge knows how to build and run
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Cpp,
    Java,
}

/// How to turn a source file into a running program.
#[derive(Clone, Copy)]
pub struct LanguageProfile {
    pub extension: &'static str,
    pub compile: Option<CommandBuilder>,
    pub run: CommandBuilder,
}

impl fmt::Debug for LanguageProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanguageProfile")
            .field("extension", &self.extension)
            .field("compiled", &self.compile.is_some())
            .finish()
    }
}

impl LanguageProfile {
    pub fn compile_command(&self, source: &Path) -> Option<Vec<String>> {
        self.compile.map(|build| build(source))
    }

    pub fn run_command(&self, source: &Path) -> Vec<String> {
        (self.run)(source)
    }
}

static PYTHON: LanguageProfile = LanguageProfile {
    extension: "py",
    compile: None,
    run: python_run,
};

static JAVASCRIPT: LanguageProfile = LanguageProfile {
    extension: "js",
    compile: None,
    run: node_run,
};

static CPP: LanguageProfile = LanguageProfile {
    extension: "cpp",
    compile: Some(gpp_compile),
    run: cpp_run,
};

static JAVA: LanguageProfile = LanguageProfile {
    extension: "java",
    compile: Some(javac_compile),
    run: java_run,
};

fn python_run(source: &Path) -> Vec<String> {
    vec!["python3".to_string(), path_arg(source)]
}

fn node_run(source: &Path) -> Vec<String> {
    vec!["node".to_string(), path_arg(source)]
}

fn gpp_compile(source: &Path) -> Vec<String> {
    vec![
        "g++".to_string(),
        path_arg(source),
        "-o".to_string(),
        path_arg(&cpp_binary(source)),
    ]
}

fn cpp_run(source: &Path) -> Vec<String> {
    vec![path_arg(&cpp_binary(source))]
}

fn javac_compile(source: &Path) -> Vec<String> {
    vec!["javac".to_string(), path_arg(source)]
}

fn java_run(source: &Path) -> Vec<String> {
    let class_dir = source.parent().unwrap_or(Path::new("."));
    let class_name = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    vec![
        "java".to_string(),
        "-cp".to_string(),
        path_arg(class_dir),
        class_name,
    ]
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn cpp_binary(source: &Path) -> PathBuf {
    if cfg!(windows) {
        source.with_extension("exe")
    } else {
        let mut name = source.as_os_str().to_owned();
        name.push(".out");
        PathBuf::from(name)
    }
}

impl Language {
    pub const ALL: [Language; 4] = [Self::Python, Self::JavaScript, Self::Cpp, Self::Java];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Cpp => "cpp",
            Self::Java => "java",
        }
    }

    pub fn profile(&self) -> &'static LanguageProfile {
        match self {
            Self::Python => &PYTHON,
            Self::JavaScript => &JAVASCRIPT,
            Self::Cpp => &CPP,
            Self::Java => &JAVA,
        }
    }

    /// Name of the file the submitted code is written to
    pub fn source_file_name(&self) -> String {
        format!("solution.{}", self.profile().extension)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = JudgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|lang| lang.as_str() == s)
            .ok_or_else(|| JudgeError::UnsupportedLanguage(s.to_string()))
    }
}
