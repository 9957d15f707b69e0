//! Stop-word sets. Closed lists; English is the fallback for any content
//! whose language is unknown.

use mailvane_protocol::payload::Language;

const EN: &[&str] = &[
    "about", "after", "all", "also", "and", "any", "are", "because", "been", "but", "can",
    "come", "could", "did", "for", "from", "get", "give", "had", "has", "have", "her", "him",
    "his", "how", "into", "its", "just", "know", "like", "look", "make", "more", "most", "new",
    "not", "now", "one", "only", "other", "our", "out", "over", "say", "see", "she", "some",
    "take", "than", "that", "the", "their", "them", "then", "there", "these", "they", "think",
    "this", "time", "two", "use", "want", "was", "way", "well", "what", "when", "which", "who",
    "will", "with", "would", "year", "you", "your",
];

const ES: &[&str] = &[
    "algo", "como", "con", "cual", "cuando", "donde", "ella", "ellos", "era", "esta", "este",
    "fue", "hay", "las", "los", "mas", "muy", "nos", "para", "pero", "por", "que", "ser",
    "sin", "sobre", "son", "sus", "tiene", "una", "uno",
];

const FR: &[&str] = &[
    "alors", "aussi", "autre", "avant", "avec", "avoir", "bon", "car", "cela", "ces", "ceux",
    "dans", "des", "elle", "est", "été", "fait", "ils", "les", "leur", "lui", "mais", "mes",
    "mon", "nos", "notre", "nous", "par", "pas", "peu", "pour", "qui", "que", "ses", "son",
    "sont", "sur", "tes", "ton", "tout", "tous", "une", "vous",
];

const DE: &[&str] = &[
    "aber", "alle", "als", "also", "auch", "auf", "aus", "bei", "bin", "bis", "bist", "damit",
    "dann", "das", "dass", "dein", "dem", "den", "der", "des", "die", "dies", "doch", "dort",
    "durch", "ein", "eine", "einem", "einen", "einer", "eines", "euer", "eure", "für", "hatte",
    "hier", "hinter", "ich", "ihr", "ihre", "ist", "jede", "jedem", "jeden", "jeder", "jedes",
    "kann", "kein", "können", "machen", "mein", "meine", "mit", "nach", "nicht", "noch", "nun",
    "nur", "oder", "schon", "sein", "seine", "sich", "sie", "sind", "über", "und", "uns",
    "unser", "unter", "vom", "von", "vor", "wann", "warum", "was", "weiter", "wenn", "wer",
    "werde", "werden", "wie", "wieder", "will", "wir", "wird", "wirst", "zum", "zur",
];

fn list(language: Language) -> &'static [&'static str] {
    match language {
        Language::En => EN,
        Language::Es => ES,
        Language::Fr => FR,
        Language::De => DE,
    }
}

pub fn is_stop_word(language: Language, word: &str) -> bool {
    list(language).contains(&word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_english_stop_words() {
        assert!(is_stop_word(Language::En, "the"));
        assert!(is_stop_word(Language::En, "would"));
        assert!(!is_stop_word(Language::En, "hello"));
    }

    #[test]
    fn test_language_specific_sets() {
        assert!(is_stop_word(Language::Es, "para"));
        assert!(!is_stop_word(Language::En, "para"));
        assert!(is_stop_word(Language::Fr, "vous"));
        assert!(is_stop_word(Language::De, "nicht"));
    }
}
