//! Kubefile parser.
//!
//! Parses a Kubefile into the ordered layer list of an image. Supports line
//! continuations (`\`), `#` comments and case-insensitive keywords.

use std::path::Path;

use cimg_core::error::{CimgError, Result};

use crate::image::{Layer, LayerType};

/// Parsed Kubefile: one layer per instruction, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Kubefile {
    pub layers: Vec<Layer>,
}

impl Kubefile {
    /// Parse a Kubefile from its text content.
    ///
    /// Structural checks (non-empty, FROM first) are left to the builder.
    pub fn parse(content: &str) -> Result<Self> {
        let mut layers = Vec::new();

        for (line_num, line) in join_continuation_lines(content) {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            layers.push(parse_instruction(trimmed, line_num)?);
        }

        Ok(Kubefile { layers })
    }

    /// Parse a Kubefile from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CimgError::InvalidKubefile(format!(
                "Failed to read Kubefile at {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }
}

/// Join lines ending with `\` into logical lines, keeping the number of the
/// line each one starts on.
fn join_continuation_lines(content: &str) -> Vec<(usize, String)> {
    let mut logical_lines = Vec::new();
    let mut current = String::new();
    let mut start = 1;

    for (idx, line) in content.lines().enumerate() {
        if current.is_empty() {
            start = idx + 1;
        }
        if let Some(stripped) = line.strip_suffix('\\') {
            current.push_str(stripped.trim_end());
            current.push(' ');
        } else {
            current.push_str(line);
            logical_lines.push((start, std::mem::take(&mut current)));
        }
    }

    if !current.is_empty() {
        logical_lines.push((start, current));
    }

    logical_lines
}

fn parse_instruction(line: &str, line_num: usize) -> Result<Layer> {
    let (keyword, rest) = split_first_word(line);
    let rest = rest.trim();

    let kind = match keyword.to_uppercase().as_str() {
        "FROM" => LayerType::From,
        "COPY" => LayerType::Copy,
        "RUN" => LayerType::Run,
        "CMD" => LayerType::Cmd,
        _ => {
            return Err(CimgError::InvalidKubefile(format!(
                "Line {}: Unknown instruction '{}'",
                line_num, keyword
            )))
        }
    };

    match kind {
        LayerType::From => {
            let mut words = rest.split_whitespace();
            match (words.next(), words.next()) {
                (Some(image), None) => Ok(Layer::new(kind, image)),
                (None, _) => Err(missing_argument(kind, "an image argument", line_num)),
                (Some(_), Some(_)) => Err(CimgError::InvalidKubefile(format!(
                    "Line {}: FROM takes exactly one image argument",
                    line_num
                ))),
            }
        }
        LayerType::Copy => {
            if rest.split_whitespace().count() < 2 {
                return Err(missing_argument(kind, "a source and a destination", line_num));
            }
            Ok(Layer::new(kind, normalize_whitespace(rest)))
        }
        LayerType::Run | LayerType::Cmd => {
            if rest.is_empty() {
                return Err(missing_argument(kind, "a command", line_num));
            }
            Ok(Layer::new(kind, rest))
        }
    }
}

fn missing_argument(kind: LayerType, what: &str, line_num: usize) -> CimgError {
    CimgError::InvalidKubefile(format!("Line {}: {} requires {}", line_num, kind, what))
}

fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(kubefile: &Kubefile) -> Vec<LayerType> {
        kubefile.layers.iter().map(|l| l.kind).collect()
    }

    #[test]
    fn test_parse_minimal() {
        let kf = Kubefile::parse("FROM scratch\nCOPY manifests .").unwrap();
        assert_eq!(kinds(&kf), vec![LayerType::From, LayerType::Copy]);
        assert_eq!(kf.layers[0].value, "scratch");
        assert_eq!(kf.layers[1].value, "manifests .");
        assert!(kf.layers.iter().all(|l| l.id.is_none()));
    }

    #[test]
    fn test_parse_full_kubefile() {
        let content = r#"
# Kubernetes with calico
FROM kubernetes:v1.22.0

COPY calico.yaml manifests/
COPY Clusterfile Clusterfile
RUN wget -q https://example.com/helm.tgz -O helm.tgz
CMD kubectl apply -f manifests/calico.yaml
"#;
        let kf = Kubefile::parse(content).unwrap();
        assert_eq!(
            kinds(&kf),
            vec![
                LayerType::From,
                LayerType::Copy,
                LayerType::Copy,
                LayerType::Run,
                LayerType::Cmd
            ]
        );
        assert_eq!(kf.layers[0].value, "kubernetes:v1.22.0");
        assert_eq!(kf.layers[4].value, "kubectl apply -f manifests/calico.yaml");
    }

    #[test]
    fn test_parse_case_insensitive() {
        let kf = Kubefile::parse("from scratch\nrun echo hi\nCopy a b").unwrap();
        assert_eq!(
            kinds(&kf),
            vec![LayerType::From, LayerType::Run, LayerType::Copy]
        );
    }

    #[test]
    fn test_parse_with_continuations() {
        let content = "FROM scratch\nRUN echo one \\\n    && echo two \\\n    && echo three";
        let kf = Kubefile::parse(content).unwrap();
        assert_eq!(kf.layers.len(), 2);
        assert!(kf.layers[1].value.contains("echo two"));
        assert!(kf.layers[1].value.contains("echo three"));
    }

    #[test]
    fn test_parse_copy_normalizes_whitespace() {
        let kf = Kubefile::parse("FROM scratch\nCOPY   a.yaml\tb.yaml   etc/").unwrap();
        assert_eq!(kf.layers[1].value, "a.yaml b.yaml etc/");
    }

    #[test]
    fn test_parse_unknown_instruction_reports_line() {
        let content = "FROM scratch\n\n# comment\nWORKDIR /app";
        let err = Kubefile::parse(content).unwrap_err();
        match err {
            CimgError::InvalidKubefile(msg) => {
                assert!(msg.contains("Line 4"), "{}", msg);
                assert!(msg.contains("WORKDIR"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_line_number_after_continuation() {
        let content = "FROM scratch\nRUN a \\\n  b\nBOGUS x";
        let err = Kubefile::parse(content).unwrap_err().to_string();
        assert!(err.contains("Line 4"), "{}", err);
    }

    #[test]
    fn test_parse_missing_arguments() {
        assert!(Kubefile::parse("FROM").is_err());
        assert!(Kubefile::parse("FROM scratch\nRUN").is_err());
        assert!(Kubefile::parse("FROM scratch\nCMD   ").is_err());
        assert!(Kubefile::parse("FROM scratch\nCOPY only-source").is_err());
        assert!(Kubefile::parse("FROM a b").is_err());
    }

    #[test]
    fn test_parse_empty_is_not_an_error() {
        let kf = Kubefile::parse("# nothing here\n\n").unwrap();
        assert!(kf.layers.is_empty());
    }

    #[test]
    fn test_from_file_missing() {
        let err = Kubefile::from_file(Path::new("/nonexistent/Kubefile")).unwrap_err();
        assert!(matches!(err, CimgError::InvalidKubefile(_)));
    }
}
