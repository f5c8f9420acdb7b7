//! Random English book text.

use rand::Rng;
use rand::seq::SliceRandom;

const VOCABULARY: &[&str] = &[
    "abstract", "basic", "virtual", "general", "dynamic", "electronic", "fundamental", "global",
    "innovative", "quantum", "logistic", "mathematical", "navigation", "optimal", "progressive",
    "qualitative", "recursive", "synthetic", "universal", "analysis", "library", "configuration",
    "documentation", "encyclopedia", "framework", "generator", "identifier", "coding",
    "localization", "optimization", "protocol", "repository", "synchronization", "translation",
    "utility", "validation", "interface", "algorithm", "database", "vector", "graphic",
    "diagram", "function", "class", "method", "object", "property", "variable", "constant",
    "array", "list", "dictionary", "string", "number", "logic", "theory", "practice",
    "experiment", "observation", "hypothesis", "conclusion", "summary", "process", "system",
    "structure", "model", "pattern", "architecture", "design", "component", "module", "service",
    "application", "platform", "tool", "technology", "methodology", "paradigm", "concept",
    "principle", "development", "implementation", "integration", "solution", "approach",
    "strategy", "infrastructure", "environment", "deployment", "monitoring", "performance",
    "scalability", "reliability", "security", "availability", "maintainability",
    "compatibility", "portability", "efficiency", "simplicity", "flexibility", "extensibility",
    "modularity", "interoperability", "specification", "requirement", "constraint",
    "capability", "feature", "attribute", "quality", "metric", "benchmark", "testing",
    "debugging", "profiling", "refactoring", "maintenance", "training", "support", "migration",
    "upgrade", "enhancement", "extension", "customization",
];

pub const LINE_WIDTH: usize = 80;

/// `word_count` words grouped into sentences of 8..=20 words and paragraphs
/// of 3..=10 sentences, paragraphs separated by a blank line.
pub fn generate_content<R: Rng + ?Sized>(rng: &mut R, word_count: u32) -> String {
    let mut paragraphs = Vec::new();
    let mut sentences = Vec::new();
    let mut words: Vec<String> = Vec::new();
    let mut sentence_len = rng.gen_range(8..=20);
    let mut paragraph_len = rng.gen_range(3..=10);

    for i in 0..word_count {
        let word = VOCABULARY.choose(rng).copied().unwrap_or("text");
        words.push(if rng.gen_bool(0.1) {
            capitalize(word)
        } else {
            word.to_string()
        });

        let last = i + 1 == word_count;
        if words.len() >= sentence_len || last {
            let mut sentence = words.join(" ");
            sentence.push('.');
            sentences.push(sentence);
            words.clear();
            sentence_len = rng.gen_range(8..=20);
        }
        if !sentences.is_empty() && (sentences.len() >= paragraph_len || last) {
            paragraphs.push(sentences.join(" "));
            sentences.clear();
            paragraph_len = rng.gen_range(3..=10);
        }
    }

    paragraphs.join("\n\n")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Greedy word wrap; a paragraph break yields one empty line.
pub fn wrap(content: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for (n, paragraph) in content.split("\n\n").enumerate() {
        if n > 0 {
            lines.push(String::new());
        }
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            if !line.is_empty() && line.len() + 1 + word.len() > width {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

/// Title block shared by every rendered book.
pub fn header(title: &str, author: &str, generated_on: &str) -> String {
    let rule = "-".repeat(LINE_WIDTH);
    format!("{title}\nAuthor: {author}\nGenerated: {generated_on}\n{rule}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn produces_the_requested_word_count() {
        let mut rng = StdRng::seed_from_u64(7);
        let content = generate_content(&mut rng, 500);
        assert_eq!(content.split_whitespace().count(), 500);
        assert!(content.ends_with('.'));
    }

    #[test]
    fn zero_words_is_empty() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(generate_content(&mut rng, 0).is_empty());
    }

    #[test]
    fn wrap_respects_width() {
        let mut rng = StdRng::seed_from_u64(1);
        let content = generate_content(&mut rng, 1_000);
        let lines = wrap(&content, LINE_WIDTH);
        assert!(lines.iter().all(|l| l.len() <= LINE_WIDTH));
        let rejoined: usize = lines.iter().map(|l| l.split_whitespace().count()).sum();
        assert_eq!(rejoined, 1_000);
    }
}
