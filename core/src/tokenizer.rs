//! Text normalisation shared by indexing and querying: tokens are lowercased,
//! routed to a per-script analyzer, filtered for function words and reduced
//! to a normal form.
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

use crate::html::html_to_text;

/// Grammatical category as far as indexing cares about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordClass {
    Content,
    Conjunction,
    Preposition,
    Interjection,
    Particle,
    Article,
    Pronoun,
    Interrogative,
}

impl WordClass {
    /// Closed-class words carry no search value and are never indexed.
    pub fn is_function_word(self) -> bool {
        !matches!(self, WordClass::Content)
    }
}

/// A script-specific morphological analyzer.
pub trait Morphology: Send + Sync {
    /// `None` when the word is outside what this analyzer understands.
    fn word_class(&self, word: &str) -> Option<WordClass>;
    /// Candidate normal forms, most likely first.
    fn normal_forms(&self, word: &str) -> Vec<String>;
}

/// Snowball stemming plus a closed-class dictionary for one alphabet.
pub struct SnowballMorphology {
    stemmer: Stemmer,
    alphabet: fn(char) -> bool,
    closed: HashMap<String, WordClass>,
    fold: fn(&str) -> String,
}

impl SnowballMorphology {
    /// `groups` are whitespace separated word lists covering every inflected
    /// form; the first class listed for a word wins.
    fn new(
        algorithm: Algorithm,
        alphabet: fn(char) -> bool,
        fold: fn(&str) -> String,
        groups: &[(WordClass, &str)],
    ) -> Self {
        let mut closed = HashMap::new();
        for (class, words) in groups {
            for w in words.split_whitespace() {
                closed.entry(fold(w)).or_insert(*class);
            }
        }
        Self { stemmer: Stemmer::create(algorithm), alphabet, closed, fold }
    }
}

impl Morphology for SnowballMorphology {
    fn word_class(&self, word: &str) -> Option<WordClass> {
        if word.is_empty() || !word.chars().all(self.alphabet) {
            return None;
        }
        Some(self.closed.get(&(self.fold)(word)).copied().unwrap_or(WordClass::Content))
    }

    fn normal_forms(&self, word: &str) -> Vec<String> {
        let folded = (self.fold)(word);
        vec![self.stemmer.stem(&folded).into_owned()]
    }
}

fn is_latin(c: char) -> bool {
    c.is_ascii_lowercase()
}

fn is_cyrillic(c: char) -> bool {
    matches!(c, 'а'..='я' | 'ё')
}

fn fold_none(word: &str) -> String {
    word.to_string()
}

fn fold_yo(word: &str) -> String {
    word.replace('ё', "е")
}

lazy_static! {
    static ref WORD: Regex = Regex::new(r"\p{L}+").expect("valid regex");

    static ref ENGLISH: SnowballMorphology = SnowballMorphology::new(
        Algorithm::English,
        is_latin,
        fold_none,
        &[
            (WordClass::Article, "a an the"),
            (WordClass::Conjunction, "and or but nor yet so because although though whereas unless whether than if \
                 while either neither both"),
            (WordClass::Preposition, "about above across after against along amid among around as at before behind below \
                 beneath beside besides between beyond by despite down during except for from in inside into \
                 like near of off on onto out outside over past per since through throughout till to toward \
                 towards under underneath unlike until up upon via with within without"),
            (WordClass::Pronoun, "i me my mine myself you your yours yourself yourselves he him his himself she her hers \
                 herself it its itself we us our ours ourselves they them their theirs themselves this that \
                 these those there someone somebody something anyone anybody anything everyone everybody \
                 everything nobody nothing none oneself whoever whatever each every all some any another \
                 such"),
            (WordClass::Interrogative, "who whom whose what which when where why how"),
            (WordClass::Particle, "not no"),
            (WordClass::Interjection, "oh ah wow hey alas oops ouch hmm yes yeah hi bye ok okay hooray uh um eh"),
        ],
    );

    static ref RUSSIAN: SnowballMorphology = SnowballMorphology::new(
        Algorithm::Russian,
        is_cyrillic,
        fold_yo,
        &[
            (WordClass::Conjunction, "и а но или либо да что чтобы чтоб если хотя потому поэтому как будто словно зато \
                 однако тоже также пока то тогда ибо итак причём"),
            (WordClass::Preposition, "в во на с со к ко по о об обо от ото до из изо у за над под про для без при через \
                 перед между около после вокруг среди вместо кроме сквозь ради возле вдоль мимо против"),
            (WordClass::Particle, "не ни бы же ли вот вон даже лишь только уже ещё разве неужели пусть ведь уж"),
            (WordClass::Interjection, "ах ох эх ой ай ура увы эй ну ага ого фу"),
            (WordClass::Pronoun, "я меня мне мной мною ты тебя тебе тобой тобою \
                 он его ему им нём него нему ним она её ей ею ней неё нею оно \
                 мы нас нам нами вы вас вам вами они их ими них ними себя себе собой собою"),
            (WordClass::Pronoun, "мой моего моему моим моём моя моей мою моё мои моих моими \
                 твой твоего твоему твоим твоём твоя твоей твою твоё твои твоих твоими \
                 свой своего своему своим своём своя своей свою своё свои своих своими \
                 наш нашего нашему нашим нашем наша нашей нашу наше наши наших нашими \
                 ваш вашего вашему вашим вашем ваша вашей вашу ваше ваши ваших вашими"),
            (WordClass::Pronoun, "этот этого этому этим этом эта этой эту это эти этих этими \
                 тот того тому тем том та той ту те тех теми \
                 весь всего всему всем всём вся всей всю всё все всех всеми \
                 сам самого самому самим самом сама самой саму само сами самих самими \
                 каждый каждого каждому каждым каждом каждая каждой каждую каждое каждые каждых каждыми \
                 который которого которому которым котором которая которой которую которое которые которых \
                 которыми никто никого никому никем ничто ничего ничему ничем некто нечто"),
            (WordClass::Interrogative, "кто кого кому кем ком чего чему чем чём \
                 какой какого какому каким каком какая какую какое какие каких какими \
                 чей чьего чьему чьим чьём чья чьей чью чьё чьи чьих чьими \
                 где куда откуда зачем почему сколько"),
        ],
    );
}

/// Pick the analyzer by script: anything with a Cyrillic letter goes to the
/// Russian analyzer, everything else to the English one.
pub fn analyzer_for(token: &str) -> &'static dyn Morphology {
    if token.chars().any(is_cyrillic) {
        &*RUSSIAN
    } else {
        &*ENGLISH
    }
}

/// Lowercased letter runs of at least two characters.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    WORD.find_iter(&normalized)
        .map(|m| m.as_str())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

/// Normal form of a single lowercased token, or `None` for function words and
/// tokens no analyzer can handle.
pub fn lemma_of(token: &str) -> Option<String> {
    let morph = analyzer_for(token);
    match morph.word_class(token) {
        Some(class) if !class.is_function_word() => morph.normal_forms(token).into_iter().next(),
        _ => None,
    }
}

/// Count lemma occurrences in plain text.
pub fn collect_lemmas(text: &str) -> HashMap<String, u32> {
    let mut lemmas: HashMap<String, u32> = HashMap::new();
    for token in tokenize(text) {
        if let Some(lemma) = lemma_of(&token) {
            *lemmas.entry(lemma).or_insert(0) += 1;
        }
    }
    lemmas
}

/// Count lemma occurrences in the visible text of an HTML document.
pub fn collect_html_lemmas(html: &str) -> HashMap<String, u32> {
    collect_lemmas(&html_to_text(html))
}
