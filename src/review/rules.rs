//! Rule-based security pass over the parsed source.
//!
//! Runs locally before the scanner's model call. Each finding carries a
//! stable rule id and becomes a `security` issue in the scan result.
//!
//! | Rule   | Detects                                            |
//! |--------|----------------------------------------------------|
//! | SEC001 | `eval()`                                           |
//! | SEC002 | `exec()`                                           |
//! | SEC003 | string literal assigned to a secret-looking name   |
//! | SEC004 | `subprocess.*(..., shell=True)`                    |
//! | SEC005 | `os.system()` / `os.popen()`                       |
//! | SEC006 | `pickle`, `marshal`, `shelve` deserialization      |
//! | SEC007 | `__import__()`                                     |
//! | SEC008 | MD5 / SHA1 through `hashlib`                       |
//! | SEC009 | `yaml.load()` without a loader                     |
//! | SEC010 | SQL built with `%` or an f-string                  |
//! | SEC011 | `assert` statements                                |
//!
//! Only Python has rules; other languages yield no findings.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tree_sitter::Node;

use super::preflight::{self, Lang};
use super::types::{CodeIssue, Severity};

static SECRET_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(password|passwd|secret|api_key|apikey|token|auth|credential|private_key)")
        .unwrap()
});

static SQL_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC)\b").unwrap()
});

const SHELL_CALLS: &[&str] = &["run", "call", "check_call", "check_output", "Popen"];
const WEAK_HASHES: &[&str] = &["md5", "sha1"];

/// `(module, function)` pairs with their rule and message.
const MODULE_CALLS: &[(&str, &str, &str, &str)] = &[
    ("os", "system", "SEC005", "Use of os.system() allows shell injection"),
    ("os", "popen", "SEC005", "Use of os.popen() allows shell injection"),
    ("pickle", "loads", "SEC006", "Deserializing untrusted data with pickle can execute arbitrary code"),
    ("pickle", "load", "SEC006", "Deserializing untrusted data with pickle can execute arbitrary code"),
    ("marshal", "loads", "SEC006", "Deserializing untrusted data with marshal can execute arbitrary code"),
    ("shelve", "open", "SEC006", "shelve uses pickle internally, untrusted data can execute code"),
    ("yaml", "load", "SEC009", "yaml.load() without SafeLoader can execute arbitrary code"),
];

/// One rule violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub rule_id: &'static str,
    pub message: String,
    pub severity: Severity,
    /// 1-based.
    pub line: u32,
    /// 1-based.
    pub column: u32,
}

impl Finding {
    fn at(
        node: Node<'_>,
        rule_id: &'static str,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        let pos = node.start_position();
        Self {
            rule_id,
            message: message.into(),
            severity,
            line: u32::try_from(pos.row + 1).unwrap_or(u32::MAX),
            column: u32::try_from(pos.column + 1).unwrap_or(u32::MAX),
        }
    }

    pub fn into_issue(self) -> CodeIssue {
        CodeIssue {
            kind: "security".into(),
            description: format!("{} ({})", self.message, self.rule_id),
            severity: self.severity,
            line: Some(self.line),
        }
    }
}

/// Run every security rule for `lang` over `code`, in source order.
///
/// Code that fails to parse yields no findings; the syntax pre-check reports it.
pub fn security_findings(code: &str, lang: Lang) -> Vec<Finding> {
    if lang != Lang::Python {
        return Vec::new();
    }
    let tree = match preflight::parse(code, lang) {
        Ok(tree) => tree,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping security rules");
            return Vec::new();
        }
    };

    let mut checker = PythonRules {
        src: code,
        aliases: HashMap::new(),
        findings: Vec::new(),
    };
    let root = tree.root_node();
    checker.collect_aliases(root);
    checker.visit(root);

    tracing::debug!(findings = checker.findings.len(), "Security rules applied");
    checker.findings
}

struct PythonRules<'a> {
    src: &'a str,
    /// Local import name → module.
    aliases: HashMap<&'a str, &'a str>,
    findings: Vec<Finding>,
}

impl<'a> PythonRules<'a> {
    fn text(&self, node: Node<'_>) -> &'a str {
        &self.src[node.byte_range()]
    }

    fn for_each_node<'t>(root: Node<'t>, mut f: impl FnMut(Node<'t>)) {
        let mut cursor = root.walk();
        loop {
            f(cursor.node());
            if cursor.goto_first_child() {
                continue;
            }
            if !preflight::advance(&mut cursor) {
                return;
            }
        }
    }

    fn collect_aliases(&mut self, root: Node<'_>) {
        let src = self.src;
        let mut aliases = HashMap::new();
        Self::for_each_node(root, |node| {
            if node.kind() != "import_statement" {
                return;
            }
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                match name.kind() {
                    "aliased_import" => {
                        if let (Some(module), Some(alias)) = (
                            name.child_by_field_name("name"),
                            name.child_by_field_name("alias"),
                        ) {
                            aliases.insert(&src[alias.byte_range()], &src[module.byte_range()]);
                        }
                    }
                    "dotted_name" => {
                        let module = &src[name.byte_range()];
                        aliases.insert(module, module);
                    }
                    _ => {}
                }
            }
        });
        self.aliases = aliases;
    }

    fn visit<'t>(&mut self, root: Node<'t>) {
        let mut nodes = Vec::new();
        Self::for_each_node(root, |node| {
            if matches!(
                node.kind(),
                "call" | "assignment" | "binary_operator" | "string" | "assert_statement"
            ) {
                nodes.push(node);
            }
        });
        for node in nodes {
            match node.kind() {
                "call" => self.check_call(node),
                "assignment" => self.check_secret(node),
                "binary_operator" => self.check_sql_format(node),
                "string" => self.check_sql_fstring(node),
                _ => self.findings.push(Finding::at(
                    node,
                    "SEC011",
                    Severity::Low,
                    "assert statements are removed when Python runs with -O",
                )),
            }
        }
    }

    /// `module.attr` with the module resolved through import aliases.
    fn qualified(&self, function: Node<'_>) -> Option<(&'a str, &'a str)> {
        if function.kind() != "attribute" {
            return None;
        }
        let object = function.child_by_field_name("object")?;
        if object.kind() != "identifier" {
            return None;
        }
        let attr = function.child_by_field_name("attribute")?;
        let local = self.text(object);
        let module = self.aliases.get(local).copied().unwrap_or(local);
        Some((module, self.text(attr)))
    }

    fn check_call(&mut self, call: Node<'_>) {
        let Some(function) = call.child_by_field_name("function") else {
            return;
        };
        let args = call.child_by_field_name("arguments");

        if function.kind() == "identifier" {
            match self.text(function) {
                "eval" => self.findings.push(Finding::at(
                    call,
                    "SEC001",
                    Severity::High,
                    "Use of eval() allows arbitrary code execution",
                )),
                "exec" => self.findings.push(Finding::at(
                    call,
                    "SEC002",
                    Severity::High,
                    "Use of exec() allows arbitrary code execution",
                )),
                "__import__" => self.findings.push(Finding::at(
                    call,
                    "SEC007",
                    Severity::Low,
                    "Use of __import__() enables dynamic code loading",
                )),
                _ => {}
            }
            return;
        }

        let Some((module, attr)) = self.qualified(function) else {
            return;
        };
        let (positional, keywords) = args.map(|a| self.split_args(a)).unwrap_or_default();

        if module == "subprocess"
            && SHELL_CALLS.contains(&attr)
            && keywords.iter().any(|&(k, v)| k == "shell" && v == "True")
        {
            self.findings.push(Finding::at(
                call,
                "SEC004",
                Severity::Medium,
                format!("subprocess.{attr}() called with shell=True"),
            ));
        }

        if let Some(&(_, _, rule, message)) = MODULE_CALLS
            .iter()
            .find(|(m, f, _, _)| *m == module && *f == attr)
        {
            let safe_yaml = rule == "SEC009"
                && (keywords.iter().any(|&(k, _)| k == "Loader") || positional.len() >= 2);
            if !safe_yaml {
                self.findings
                    .push(Finding::at(call, rule, Severity::Medium, message));
            }
        }

        if module == "hashlib" {
            if WEAK_HASHES.contains(&attr) {
                self.findings.push(Finding::at(
                    call,
                    "SEC008",
                    Severity::Medium,
                    format!("Use of weak hash algorithm: hashlib.{attr}()"),
                ));
            } else if attr == "new" {
                let algorithm = positional
                    .first()
                    .filter(|n| n.kind() == "string")
                    .map(|&n| self.string_value(n));
                let weak = algorithm
                    .filter(|a| WEAK_HASHES.contains(&a.to_ascii_lowercase().as_str()));
                if let Some(algo) = weak {
                    self.findings.push(Finding::at(
                        call,
                        "SEC008",
                        Severity::Medium,
                        format!("Use of weak hash algorithm: hashlib.new('{algo}')"),
                    ));
                }
            }
        }
    }

    /// Positional argument nodes and `(name, value text)` keyword pairs.
    fn split_args<'t>(&self, args: Node<'t>) -> (Vec<Node<'t>>, Vec<(&'a str, &'a str)>) {
        let mut positional = Vec::new();
        let mut keywords = Vec::new();
        let mut cursor = args.walk();
        for arg in args.named_children(&mut cursor) {
            match arg.kind() {
                "keyword_argument" => {
                    if let (Some(name), Some(value)) = (
                        arg.child_by_field_name("name"),
                        arg.child_by_field_name("value"),
                    ) {
                        keywords.push((self.text(name), self.text(value)));
                    }
                }
                "comment" => {}
                _ => positional.push(arg),
            }
        }
        (positional, keywords)
    }

    /// Literal text of a string node, without quotes or interpolations.
    fn string_value(&self, string: Node<'_>) -> String {
        let mut cursor = string.walk();
        string
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "string_content")
            .map(|c| self.text(c))
            .collect()
    }

    fn is_fstring(string: Node<'_>) -> bool {
        let mut cursor = string.walk();
        let has_interpolation = string
            .named_children(&mut cursor)
            .any(|c| c.kind() == "interpolation");
        has_interpolation
    }

    fn check_secret(&mut self, assignment: Node<'_>) {
        let (Some(left), Some(right)) = (
            assignment.child_by_field_name("left"),
            assignment.child_by_field_name("right"),
        ) else {
            return;
        };
        if left.kind() != "identifier" || right.kind() != "string" || Self::is_fstring(right) {
            return;
        }
        let name = self.text(left);
        if SECRET_NAME.is_match(name) && !self.string_value(right).is_empty() {
            self.findings.push(Finding::at(
                assignment,
                "SEC003",
                Severity::Medium,
                format!("Possible hardcoded secret in variable '{name}'"),
            ));
        }
    }

    fn sql_finding(node: Node<'_>) -> Finding {
        Finding::at(
            node,
            "SEC010",
            Severity::Medium,
            "Possible SQL injection: query built with string formatting",
        )
    }

    fn check_sql_format(&mut self, binary: Node<'_>) {
        let is_modulo = binary
            .child_by_field_name("operator")
            .is_some_and(|op| op.kind() == "%");
        let Some(left) = binary.child_by_field_name("left") else {
            return;
        };
        if is_modulo && left.kind() == "string" && SQL_KEYWORD.is_match(&self.string_value(left)) {
            self.findings.push(Self::sql_finding(binary));
        }
    }

    fn check_sql_fstring(&mut self, string: Node<'_>) {
        if Self::is_fstring(string) && SQL_KEYWORD.is_match(&self.string_value(string)) {
            self.findings.push(Self::sql_finding(string));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(code: &str) -> Vec<&'static str> {
        security_findings(code, Lang::Python)
            .into_iter()
            .map(|f| f.rule_id)
            .collect()
    }

    #[test]
    fn eval_and_exec_are_high_severity() {
        let findings = security_findings("x = eval(data)\nexec(code)\n", Lang::Python);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].rule_id, "SEC001");
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!((findings[0].line, findings[0].column), (1, 5));
        assert_eq!(findings[1].rule_id, "SEC002");
        assert_eq!(findings[1].line, 2);
    }

    #[test]
    fn method_named_eval_is_not_flagged() {
        assert!(rules("model.eval()\n").is_empty());
    }

    #[test]
    fn hardcoded_secrets() {
        assert_eq!(rules("API_KEY = 'sk-123'\n"), vec!["SEC003"]);
        assert_eq!(rules("db_password: str = \"hunter2\"\n"), vec!["SEC003"]);
        assert!(rules("password = ''\n").is_empty());
        assert!(rules("password = os.environ['PW']\n").is_empty());
        assert!(rules("username = 'admin'\n").is_empty());
    }

    #[test]
    fn shell_true_only_for_subprocess() {
        assert_eq!(
            rules("import subprocess\nsubprocess.run(cmd, shell=True)\n"),
            vec!["SEC004"]
        );
        assert!(rules("import subprocess\nsubprocess.run(['ls'], shell=False)\n").is_empty());
        assert!(rules("other.run(cmd, shell=True)\n").is_empty());
    }

    #[test]
    fn module_aliases_are_resolved() {
        assert_eq!(rules("import pickle as pk\npk.loads(blob)\n"), vec!["SEC006"]);
        assert_eq!(
            rules("import subprocess as sp\nsp.Popen(cmd, shell=True)\n"),
            vec!["SEC004"]
        );
    }

    #[test]
    fn os_and_deserialization_calls() {
        let code = "import os, marshal, shelve\nos.system(c)\nos.popen(c)\nmarshal.loads(b)\nshelve.open(p)\n";
        assert_eq!(rules(code), vec!["SEC005", "SEC005", "SEC006", "SEC006"]);
    }

    #[test]
    fn dynamic_import_is_low() {
        let findings = security_findings("m = __import__(name)\n", Lang::Python);
        assert_eq!(findings[0].rule_id, "SEC007");
        assert_eq!(findings[0].severity, Severity::Low);
    }

    #[test]
    fn weak_hashes() {
        let code = "import hashlib\nhashlib.md5(b)\nhashlib.new('SHA1')\nhashlib.sha256(b)\n";
        assert_eq!(rules(code), vec!["SEC008", "SEC008"]);
    }

    #[test]
    fn yaml_load_needs_a_loader() {
        assert_eq!(rules("import yaml\nyaml.load(f)\n"), vec!["SEC009"]);
        assert!(rules("import yaml\nyaml.load(f, Loader=yaml.SafeLoader)\n").is_empty());
        assert!(rules("import yaml\nyaml.load(f, yaml.SafeLoader)\n").is_empty());
    }

    #[test]
    fn sql_string_formatting() {
        assert_eq!(
            rules("q = \"SELECT * FROM users WHERE id = %s\" % uid\n"),
            vec!["SEC010"]
        );
        assert_eq!(
            rules("q = f\"DELETE FROM t WHERE id = {uid}\"\n"),
            vec!["SEC010"]
        );
        assert!(rules("q = f\"hello {name}\"\n").is_empty());
        assert!(rules("q = \"SELECT 1\"\n").is_empty());
    }

    #[test]
    fn asserts_are_reported() {
        assert_eq!(rules("assert user.is_admin\n"), vec!["SEC011"]);
    }

    #[test]
    fn findings_become_security_issues() {
        let issue = security_findings("eval(x)\n", Lang::Python)
            .remove(0)
            .into_issue();
        assert_eq!(issue.kind, "security");
        assert_eq!(issue.severity, Severity::High);
        assert_eq!(issue.line, Some(1));
        assert!(issue.description.ends_with("(SEC001)"));
    }

    #[test]
    fn rust_has_no_rules() {
        assert!(security_findings("fn main() { unsafe {} }", Lang::Rust).is_empty());
    }

    #[test]
    fn deeply_nested_source_is_walked_without_recursion() {
        let depth = 20_000;
        let code = format!("x = {}eval(y){}\n", "[".repeat(depth), "]".repeat(depth));
        assert_eq!(rules(&code), vec!["SEC001"]);
    }
}
