//! Fenced code block extraction from completed chat messages.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub source: String,
}

impl CodeBlock {
    /// Blocks without a language tag are assumed to be Python.
    pub fn is_executable(&self) -> bool {
        match self.language.as_deref() {
            None => true,
            Some(lang) => matches!(lang, "python" | "py" | "python3"),
        }
    }
}

struct OpenFence {
    marker: char,
    len: usize,
    language: Option<String>,
    lines: Vec<String>,
}

fn fence_prefix(line: &str) -> Option<(char, usize, &str)> {
    let trimmed = line.trim_start();
    let marker = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = trimmed.chars().take_while(|c| *c == marker).count();
    if len < 3 {
        return None;
    }
    Some((marker, len, &trimmed[len..]))
}

/// Returns every terminated fenced block in document order. A block left
/// open at the end of the text is not returned.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<OpenFence> = None;

    for line in text.lines() {
        match open.as_mut() {
            None => {
                let Some((marker, len, info)) = fence_prefix(line) else {
                    continue;
                };
                // Backtick fences may not carry backticks in the info string.
                if marker == '`' && info.contains('`') {
                    continue;
                }
                let language = info
                    .split_whitespace()
                    .next()
                    .map(str::to_ascii_lowercase);
                open = Some(OpenFence {
                    marker,
                    len,
                    language,
                    lines: Vec::new(),
                });
            }
            Some(fence) => {
                let closes = fence_prefix(line).is_some_and(|(marker, len, rest)| {
                    marker == fence.marker && len >= fence.len && rest.trim().is_empty()
                });
                if closes {
                    if let Some(done) = open.take() {
                        blocks.push(CodeBlock {
                            language: done.language,
                            source: done.lines.join("\n"),
                        });
                    }
                } else {
                    fence.lines.push(line.to_string());
                }
            }
        }
    }

    blocks
}

/// Joins executable block sources in document order, ready for one run.
pub fn join_executable(blocks: &[CodeBlock]) -> String {
    blocks
        .iter()
        .filter(|block| block.is_executable())
        .map(|block| block.source.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
