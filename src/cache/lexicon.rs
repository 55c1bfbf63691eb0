//! Word-class lexicon for similarity weighting.
//!
//! Tokens are weighted by grammatical class when scoring two prompts
//! against each other: verbs carry the intent of a request, so they weigh
//! the most; articles carry almost none. Classification is a table lookup
//! over a broad general-purpose vocabulary with light suffix stripping so
//! inflected forms (`created`, `creating`, `orders`) classify like their
//! stems.
//!
//! The tables are closed, stable sets. Tool- or domain-specific vocabulary
//! does not belong here; unknown words classify as `Other` with a neutral
//! weight, which is the right default for product nouns and identifiers.

// ─── Word Classes ────────────────────────────────────────────────────────────

/// Grammatical class of a token, as far as similarity scoring cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordClass {
    Verb,
    Noun,
    Adjective,
    Preposition,
    Article,
    Other,
}

impl WordClass {
    /// Scoring weight for one token of this class.
    pub fn weight(self) -> f64 {
        match self {
            WordClass::Verb => 2.0,
            WordClass::Noun => 1.5,
            WordClass::Adjective => 1.2,
            WordClass::Preposition => 0.8,
            WordClass::Article => 0.5,
            WordClass::Other => 1.0,
        }
    }
}

/// Classify a lowercase token.
///
/// Precedence when a word sits in several tables (`order` is both a verb
/// and a noun): article, preposition, verb, noun, adjective. The same
/// precedence applies to every message being compared, so a given token
/// always contributes the same weight on both sides.
pub fn classify(token: &str) -> WordClass {
    let candidates = stem_candidates(token);
    let hit = |table: &[&str]| candidates.iter().any(|c| table.contains(&c.as_str()));

    if hit(ARTICLES) {
        WordClass::Article
    } else if hit(PREPOSITIONS) {
        WordClass::Preposition
    } else if hit(VERBS) {
        WordClass::Verb
    } else if hit(NOUNS) {
        WordClass::Noun
    } else if hit(ADJECTIVES) {
        WordClass::Adjective
    } else {
        WordClass::Other
    }
}

/// The token plus its plausible stems, most specific first.
///
/// Handles the regular English inflections that show up in short imperative
/// prompts: plural `-s`/`-es`, past `-ed`, progressive `-ing`, `-ies`/`-ied`
/// back to `-y`, dropped final `e` and doubled final consonants. Bogus
/// candidates are harmless: they only ever hit curated tables.
pub fn stem_candidates(token: &str) -> Vec<String> {
    let mut out = vec![token.to_string()];
    let n = token.len();

    if n > 4 && token.ends_with("ies") {
        out.push(format!("{}y", &token[..n - 3]));
    }
    if n > 4 && token.ends_with("ied") {
        out.push(format!("{}y", &token[..n - 3]));
    }
    if n > 4 && token.ends_with("ing") {
        let stem = &token[..n - 3];
        out.push(stem.to_string());
        out.push(format!("{stem}e"));
        push_undoubled(&mut out, stem);
    }
    if n > 3 && token.ends_with("ed") {
        let stem = &token[..n - 2];
        out.push(stem.to_string());
        out.push(format!("{stem}e"));
        push_undoubled(&mut out, stem);
    }
    if n > 3 && token.ends_with("es") {
        out.push(token[..n - 2].to_string());
    }
    if n > 2 && token.ends_with('s') && !token.ends_with("ss") {
        out.push(token[..n - 1].to_string());
    }

    out
}

/// `runn` → `run`, `stopp` → `stop`. Compares chars, not bytes: `tokenize`
/// admits any alphanumeric token, not just ASCII.
fn push_undoubled(out: &mut Vec<String>, stem: &str) {
    let mut rev = stem.chars().rev();
    if let (Some(last), Some(prev)) = (rev.next(), rev.next()) {
        if last == prev && rev.next().is_some() {
            out.push(stem[..stem.len() - last.len_utf8()].to_string());
        }
    }
}

// ─── Antonym Pairs ───────────────────────────────────────────────────────────

/// Opposite-intent verb pairs. Two prompts that land on opposite members of
/// any pair are never similar, whatever their token overlap: "create an
/// order" and "delete the order" share almost every word and mean opposite
/// things.
pub const ANTONYM_PAIRS: &[(&str, &str)] = &[
    ("create", "delete"),
    ("create", "destroy"),
    ("create", "remove"),
    ("add", "remove"),
    ("add", "delete"),
    ("enable", "disable"),
    ("activate", "deactivate"),
    ("start", "stop"),
    ("start", "finish"),
    ("open", "close"),
    ("grant", "revoke"),
    ("allow", "deny"),
    ("allow", "block"),
    ("accept", "reject"),
    ("approve", "decline"),
    ("lock", "unlock"),
    ("block", "unblock"),
    ("subscribe", "unsubscribe"),
    ("install", "uninstall"),
    ("register", "unregister"),
    ("connect", "disconnect"),
    ("attach", "detach"),
    ("increase", "decrease"),
    ("upload", "download"),
    ("import", "export"),
    ("buy", "sell"),
    ("pause", "resume"),
    ("expand", "collapse"),
    ("minimize", "maximize"),
    ("show", "hide"),
    ("undo", "redo"),
    ("archive", "unarchive"),
];

// ─── Tables ──────────────────────────────────────────────────────────────────

/// English articles.
const ARTICLES: &[&str] = &["a", "an", "the"];

/// Common prepositions.
const PREPOSITIONS: &[&str] = &[
    "about", "above", "across", "after", "against", "along", "among", "around",
    "at", "before", "behind", "below", "beneath", "beside", "between", "beyond",
    "by", "despite", "down", "during", "except", "for", "from", "in", "inside",
    "into", "near", "of", "off", "on", "onto", "out", "outside", "over", "per",
    "regarding", "since", "through", "throughout", "to", "toward", "towards",
    "under", "underneath", "until", "up", "upon", "via", "with", "within",
    "without",
];

/// Common verbs, base forms.
const VERBS: &[&str] = &[
    // Create / modify / destroy
    "add", "append", "apply", "archive", "build", "change", "clean", "clear",
    "clone", "combine", "configure", "convert", "copy", "correct", "create",
    "customize", "define", "delete", "destroy", "discard", "draft", "duplicate",
    "edit", "erase", "extend", "fill", "fix", "format", "generate", "insert",
    "make", "merge", "modify", "move", "overwrite", "redo", "remove", "rename",
    "reorder", "repair", "replace", "reset", "resize", "restore", "revert",
    "rewrite", "rotate", "split", "trim", "undo", "update", "write",
    // Read / find
    "analyze", "browse", "check", "compare", "compute", "count", "describe",
    "detect", "display", "estimate", "evaluate", "examine", "explain", "export",
    "extract", "fetch", "filter", "find", "get", "group", "identify", "import",
    "inspect", "list", "load", "locate", "look", "lookup", "match", "monitor",
    "obtain", "preview", "print", "query", "read", "receive", "recommend",
    "retrieve", "review", "scan", "search", "see", "select", "show", "sort",
    "summarize", "track", "translate", "verify", "view", "watch",
    // Communicate
    "answer", "ask", "call", "contact", "discuss", "email", "escalate",
    "follow", "forward", "invite", "mention", "message", "notify", "post",
    "publish", "remind", "reply", "report", "request", "respond", "send",
    "share", "submit", "suggest", "tell",
    // Commerce / workflow
    "accept", "approve", "assign", "authorize", "bill", "book", "buy",
    "cancel", "charge", "claim", "close", "complete", "confirm", "decline",
    "deliver", "expire", "finish", "invoice", "issue", "order", "pay", "place",
    "purchase", "quote", "refund", "reject", "renew", "reopen", "reschedule",
    "reserve", "return", "schedule", "sell", "ship", "sign", "subscribe",
    "transfer", "unsubscribe", "validate",
    // Operations / control
    "activate", "allow", "attach", "backup", "block", "boot", "connect",
    "deactivate", "debug", "decrease", "deny", "deploy", "detach", "disable",
    "disconnect", "download", "enable", "encrypt", "execute", "expand", "flag",
    "grant", "halt", "hide", "increase", "install", "integrate", "launch",
    "link", "lock", "log", "login", "logout", "migrate", "mount", "open",
    "pause", "perform", "process", "provision", "push", "queue", "reboot",
    "rebuild", "redirect", "refresh", "register", "release", "reload",
    "restart", "resume", "retry", "revoke", "run", "save", "set", "skip",
    "start", "stop", "store", "suspend", "switch", "sync", "synchronize",
    "tag", "terminate", "test", "trigger", "unblock", "uninstall", "unlock",
    "unregister", "upgrade", "upload", "use",
    // General
    "begin", "bring", "choose", "collect", "consider", "continue", "decide",
    "end", "enter", "give", "handle", "help", "hold", "ignore", "include",
    "join", "keep", "know", "learn", "leave", "manage", "mark", "need",
    "offer", "organize", "plan", "prepare", "provide", "put", "require",
    "take", "try", "turn", "want", "work",
];

/// Common nouns.
const NOUNS: &[&str] = &[
    // Business objects
    "account", "agreement", "amount", "balance", "bill", "budget", "campaign",
    "cart", "catalog", "charge", "claim", "client", "company", "contract",
    "cost", "coupon", "credit", "currency", "customer", "deal", "delivery",
    "department", "discount", "employee", "expense", "fee", "goal", "invoice",
    "item", "lead", "manager", "member", "money", "offer", "order",
    "organization", "owner", "partner", "payment", "plan", "price", "product",
    "profit", "purchase", "quantity", "quote", "rate", "receipt", "refund",
    "revenue", "sale", "shipment", "staff", "statement", "subscription",
    "supplier", "tax", "team", "total", "transaction", "vendor", "warehouse",
    // Documents / content
    "agenda", "article", "attachment", "chapter", "chart", "comment",
    "content", "description", "detail", "document", "draft", "entry", "feed",
    "feedback", "form", "image", "info", "information", "letter", "line",
    "list", "memo", "message", "note", "notification", "page", "paragraph",
    "photo", "picture", "post", "question", "record", "reference", "reminder",
    "report", "request", "response", "result", "review", "row", "section",
    "sentence", "signature", "spreadsheet", "summary", "table", "template",
    "text", "ticket", "title", "topic", "video", "word",
    // Technical objects
    "alert", "api", "app", "application", "archive", "backup", "batch",
    "branch", "brand", "browser", "bug", "button", "cache", "certificate",
    "channel", "cluster", "code", "column", "config", "configuration",
    "connection", "container", "dashboard", "data", "database", "device",
    "directory", "disk", "domain", "email", "endpoint", "engine",
    "environment", "error", "event", "export", "field", "file", "filter",
    "folder", "function", "gateway", "group", "history", "host", "import",
    "inbox", "incident", "index", "instance", "integration", "issue", "job",
    "key", "keyword", "label", "language", "laptop", "layout", "library",
    "license", "limit", "link", "log", "login", "machine", "mail", "map",
    "memory", "menu", "metric", "model", "module", "network", "node",
    "option", "package", "parameter", "password", "path", "permission",
    "phone", "pipeline", "platform", "policy", "port", "profile", "project",
    "property", "query", "queue", "registry", "release", "repository",
    "resource", "role", "route", "rule", "schema", "screen", "script",
    "search", "security", "server", "service", "session", "setting", "site",
    "source", "spec", "specification", "status", "storage", "store", "system",
    "tag", "task", "test", "theme", "token", "tool", "update", "upload",
    "url", "user", "username", "value", "version", "view", "webhook",
    "website", "window", "workflow", "workspace",
    // Time / place
    "address", "calendar", "city", "country", "date", "day", "deadline",
    "hour", "location", "meeting", "minute", "month", "morning", "office",
    "region", "room", "schedule", "time", "timeline", "timezone", "vacation",
    "week", "weekend", "year",
    // People / misc
    "admin", "author", "case", "category", "contact", "name", "number",
    "people", "person", "position", "priority", "process", "reason", "size",
    "stage", "state", "step", "type", "unit", "way",
];

/// Common adjectives.
const ADJECTIVES: &[&str] = &[
    // State
    "active", "available", "broken", "busy", "closed", "complete", "correct",
    "current", "disabled", "done", "due", "empty", "enabled", "expired",
    "final", "finished", "full", "hidden", "inactive", "incomplete",
    "incorrect", "invalid", "locked", "missing", "open", "outstanding",
    "overdue", "paid", "pending", "ready", "unavailable", "unpaid", "unread",
    "valid", "visible",
    // Size / degree
    "big", "double", "entire", "extra", "high", "huge", "large", "little",
    "long", "low", "major", "maximum", "minimum", "minor", "multiple",
    "partial", "short", "single", "small", "tiny", "whole",
    // Quality
    "bad", "basic", "cheap", "complex", "critical", "detailed", "different",
    "easy", "exact", "expensive", "fast", "free", "good", "great", "helpful",
    "important", "necessary", "negative", "normal", "positive", "possible",
    "quick", "relevant", "secure", "significant", "similar", "simple", "slow",
    "special", "specific", "standard", "urgent", "useful", "wrong",
    // Scope / kind
    "additional", "administrative", "automatic", "common", "confidential",
    "custom", "default", "digital", "direct", "duplicate", "external",
    "financial", "general", "global", "internal", "local", "manual",
    "mobile", "online", "optional", "original", "personal", "primary",
    "private", "public", "regular", "related", "remote", "required",
    "secondary", "separate", "temporary", "unique",
    // Time
    "annual", "daily", "early", "first", "hourly", "last", "late", "latest",
    "monthly", "new", "next", "old", "past", "previous", "quarterly",
    "recent", "upcoming", "weekly", "yearly",
];

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_class() {
        assert_eq!(classify("create"), WordClass::Verb);
        assert_eq!(classify("order"), WordClass::Verb); // verb beats noun
        assert_eq!(classify("invoice"), WordClass::Verb);
        assert_eq!(classify("customer"), WordClass::Noun);
        assert_eq!(classify("new"), WordClass::Adjective);
        assert_eq!(classify("with"), WordClass::Preposition);
        assert_eq!(classify("the"), WordClass::Article);
        assert_eq!(classify("zzyzx"), WordClass::Other);
    }

    #[test]
    fn test_classify_inflected_forms() {
        assert_eq!(classify("created"), WordClass::Verb);
        assert_eq!(classify("creating"), WordClass::Verb);
        assert_eq!(classify("deletes"), WordClass::Verb);
        assert_eq!(classify("customers"), WordClass::Noun);
        assert_eq!(classify("copies"), WordClass::Verb); // copies -> copy
        assert_eq!(classify("applied"), WordClass::Verb); // applied -> apply
        assert_eq!(classify("running"), WordClass::Verb); // runn -> run
        assert_eq!(classify("stopped"), WordClass::Verb); // stopp -> stop
    }

    #[test]
    fn test_stem_candidates_cover_regular_inflections() {
        assert!(stem_candidates("creating").contains(&"create".to_string()));
        assert!(stem_candidates("searches").contains(&"search".to_string()));
        assert!(stem_candidates("queries").contains(&"query".to_string()));
        assert!(stem_candidates("orders").contains(&"order".to_string()));
        // Short words and -ss endings are left alone.
        assert_eq!(stem_candidates("is"), vec!["is".to_string()]);
        assert_eq!(stem_candidates("as"), vec!["as".to_string()]);
        assert!(!stem_candidates("access").contains(&"acces".to_string()));
    }

    #[test]
    fn test_stem_candidates_non_ascii() {
        // U+4249 encodes as e4 89 89; the repeated trailing byte must not be
        // mistaken for a doubled consonant mid-char.
        assert!(stem_candidates("䉉ed").contains(&"䉉".to_string()));
        assert!(stem_candidates("䉉䉉䉉ing").contains(&"䉉䉉".to_string()));
        assert_eq!(classify("䉉ed"), WordClass::Other);
    }

    #[test]
    fn test_weights_match_class_table() {
        assert_eq!(WordClass::Verb.weight(), 2.0);
        assert_eq!(WordClass::Noun.weight(), 1.5);
        assert_eq!(WordClass::Adjective.weight(), 1.2);
        assert_eq!(WordClass::Preposition.weight(), 0.8);
        assert_eq!(WordClass::Article.weight(), 0.5);
        assert_eq!(WordClass::Other.weight(), 1.0);
    }

    #[test]
    fn test_antonym_pairs_are_distinct_words() {
        for (a, b) in ANTONYM_PAIRS {
            assert_ne!(a, b, "pair ({a}, {b}) is degenerate");
        }
    }
}
