//! Prefix-tree matcher for sensitive words.
//!
//! The trie is built once from a word set and never changes afterwards, so a
//! single instance is shared across workers behind an `Arc` with no locking.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use tracing::{info, warn};

/// Words filtered even when no external list is configured.
pub const BASELINE_WORDS: [&str; 10] = [
    "违禁词",
    "敏感内容",
    "诈骗",
    "赌博",
    "色情",
    "传销",
    "非法集资",
    "洗钱",
    "枪支",
    "毒品",
];

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    is_end: bool,
}

#[derive(Debug, Default)]
pub struct SensitiveWordTrie {
    root: TrieNode,
    words: usize,
}

impl SensitiveWordTrie {
    /// Build from `words`. Words are trimmed; blanks and duplicates are skipped.
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut trie = SensitiveWordTrie::default();
        for word in words {
            trie.insert(word.as_ref().trim());
        }
        trie
    }

    fn insert(&mut self, word: &str) {
        if word.is_empty() {
            return;
        }

        let mut node = &mut self.root;
        for c in word.chars() {
            node = node.children.entry(c).or_default();
        }
        if !node.is_end {
            node.is_end = true;
            self.words += 1;
        }
    }

    /// Number of distinct words.
    pub fn len(&self) -> usize {
        self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words == 0
    }

    /// Length in chars of the longest word starting at `chars[start]`, or 0.
    fn longest_match(&self, chars: &[char], start: usize) -> usize {
        let mut node = &self.root;
        let mut longest = 0;
        for (offset, c) in chars[start..].iter().enumerate() {
            match node.children.get(c) {
                Some(next) => node = next,
                None => break,
            }
            if node.is_end {
                longest = offset + 1;
            }
        }
        longest
    }

    /// Replace every char of each matched word with `mask`.
    ///
    /// Scans left to right, committing at each position to the longest
    /// complete word found there. The result has the same number of chars as
    /// `text`.
    pub fn filter(&self, text: &str, mask: char) -> String {
        if self.is_empty() || text.is_empty() {
            return text.to_owned();
        }

        let chars: Vec<char> = text.chars().collect();
        let mut filtered = String::with_capacity(text.len());
        let mut i = 0;
        while i < chars.len() {
            match self.longest_match(&chars, i) {
                0 => {
                    filtered.push(chars[i]);
                    i += 1;
                }
                len => {
                    filtered.extend(std::iter::repeat(mask).take(len));
                    i += len;
                }
            }
        }
        filtered
    }
}

/// Words from a word-list file body: one per line, trimmed, with blank and
/// `#` comment lines ignored.
pub fn parse_word_list(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// The baseline words merged with the list at `path`, if any.
///
/// A file that cannot be read is logged and ignored.
pub fn load_words(path: Option<&Path>) -> BTreeSet<String> {
    let mut words: BTreeSet<String> = BASELINE_WORDS.iter().map(|w| w.to_string()).collect();

    let Some(path) = path else {
        return words;
    };

    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let before = words.len();
            words.extend(parse_word_list(&contents).map(str::to_owned));
            info!(
                path = %path.display(),
                added = words.len() - before,
                "loaded sensitive word list"
            );
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "could not read sensitive word list, using built-in words only"
            );
        }
    }

    words
}
