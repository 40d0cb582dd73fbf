//! Keyword and regex classifier for messages that need no model call.
//!
//! English and Indonesian. Reference numbers win over everything else, then
//! requests for a human, then the small-talk and FAQ intents. Small-talk
//! intents only fire on short messages so that "hi, my parcel arrived
//! broken, what now?" still reaches the model.

use std::sync::LazyLock;

use regex::Regex;

/// What a message is asking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Hello.
    Greeting,
    /// Thank you.
    Thanks,
    /// Goodbye.
    Goodbye,
    /// The customer wants a person.
    HumanAgent,
    /// Opening hours.
    BusinessHours,
    /// Address.
    Location,
    /// List of bookable services.
    Services,
    /// Status of an order.
    OrderStatus {
        /// Order number, uppercased.
        order_number: String,
    },
    /// Courier tracking of an order.
    Shipping {
        /// Order number, uppercased.
        order_number: String,
    },
    /// Cancel an order.
    CancelOrder {
        /// Order number, uppercased.
        order_number: String,
    },
    /// Status of a booking.
    BookingStatus {
        /// Booking number, uppercased.
        booking_number: String,
    },
}

impl Intent {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Thanks => "thanks",
            Self::Goodbye => "goodbye",
            Self::HumanAgent => "human_agent",
            Self::BusinessHours => "business_hours",
            Self::Location => "location",
            Self::Services => "services",
            Self::OrderStatus { .. } => "order_status",
            Self::Shipping { .. } => "shipping",
            Self::CancelOrder { .. } => "cancel_order",
            Self::BookingStatus { .. } => "booking_status",
        }
    }
}

static ORDER_NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\bORD-\d{8}-[A-Z0-9]{4}\b").ok());
static BOOKING_NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\bBKG-\d{8}-[A-Z0-9]{4}\b").ok());

/// Phrases that ask for a person on their own.
const HUMAN_PHRASES: &[&str] = &[
    "customer service",
    "real person",
    "live chat",
    "live agent",
    "human agent",
    "talk to someone",
    "speak to someone",
    "orang asli",
];
/// Who the customer may ask for. Only counts alongside a request verb or
/// as an almost bare message ("admin?", "cs dong").
const HUMAN_TARGETS: &[&str] = &[
    "human",
    "person",
    "agent",
    "admin",
    "cs",
    "operator",
    "staff",
    "manusia",
    "petugas",
];
const HUMAN_VERBS: &[&str] = &[
    "talk",
    "speak",
    "chat",
    "connect",
    "transfer",
    "contact",
    "call",
    "hubungi",
    "hubungkan",
    "sambungkan",
    "bicara",
    "ngobrol",
    "minta",
];
/// Words that turn "cancel" into "don't cancel". `don't` splits into
/// `don` and `t`.
const NEGATIONS: &[&str] = &[
    "not", "don", "dont", "never", "no", "jangan", "tidak", "tak", "gak", "ga", "nggak",
    "enggak", "ngga", "bukan",
];
/// How many words before a cancel keyword a negation may sit.
const NEGATION_WINDOW: usize = 4;
const CANCEL: &[&str] = &["cancel", "batal", "batalkan", "membatalkan", "pembatalan"];
const SHIPPING: &[&str] = &[
    "ship",
    "shipping",
    "shipped",
    "delivery",
    "courier",
    "track",
    "tracking",
    "kirim",
    "dikirim",
    "pengiriman",
    "kurir",
    "resi",
];
const GREETING: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hai",
    "halo",
    "hallo",
    "good morning",
    "good afternoon",
    "good evening",
    "selamat pagi",
    "selamat siang",
    "selamat sore",
    "selamat malam",
    "pagi",
    "assalamualaikum",
];
const THANKS: &[&str] = &[
    "thanks",
    "thank you",
    "thx",
    "ty",
    "terima kasih",
    "terimakasih",
    "makasih",
    "trims",
    "tq",
];
const GOODBYE: &[&str] = &[
    "bye",
    "goodbye",
    "see you",
    "see ya",
    "dadah",
    "sampai jumpa",
];
const HOURS: &[&str] = &[
    "opening hours",
    "business hours",
    "open hours",
    "when do you open",
    "what time do you open",
    "what time do you close",
    "are you open",
    "open today",
    "jam buka",
    "jam operasional",
    "buka jam",
    "kapan buka",
    "jam tutup",
    "tutup jam",
];
const LOCATION: &[&str] = &[
    "address",
    "location",
    "where are you",
    "where is your store",
    "where is the store",
    "alamat",
    "lokasi",
    "dimana",
    "di mana",
];
const SERVICE_PHRASES: &[&str] = &[
    "what services",
    "your services",
    "list of services",
    "services do you offer",
    "service list",
    "layanan apa",
    "daftar layanan",
    "ada layanan",
];
const SERVICE_WORDS: &[&str] = &["services", "service", "layanan", "treatment"];

/// Word-normalised message: lowercase words separated by single spaces,
/// padded with a space on each side for whole-phrase matching.
struct Words {
    tokens: Vec<String>,
    padded: String,
    count: usize,
}

impl Words {
    fn new(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !(c.is_alphanumeric() || c == '-'))
            .filter(|w| !w.is_empty())
            .collect();
        Self {
            padded: format!(" {} ", words.join(" ")),
            count: words.len(),
            tokens: words.into_iter().map(str::to_owned).collect(),
        }
    }

    /// Whether some word from `keywords` appears with no negation in the
    /// few words before it.
    fn has_unnegated(&self, keywords: &[&str]) -> bool {
        self.tokens.iter().enumerate().any(|(i, token)| {
            keywords.contains(&token.as_str())
                && !self.tokens[i.saturating_sub(NEGATION_WINDOW)..i]
                    .iter()
                    .any(|w| NEGATIONS.contains(&w.as_str()))
        })
    }

    fn has_any(&self, phrases: &[&str]) -> bool {
        phrases
            .iter()
            .any(|phrase| self.padded.contains(&format!(" {phrase} ")))
    }
}

fn find_reference(regex: &LazyLock<Option<Regex>>, text: &str) -> Option<String> {
    regex
        .as_ref()
        .and_then(|re| re.find(text))
        .map(|m| m.as_str().to_uppercase())
}

fn asks_for_person(words: &Words) -> bool {
    if words.has_any(HUMAN_PHRASES) {
        return true;
    }
    words.has_any(HUMAN_TARGETS) && (words.count <= 3 || words.has_any(HUMAN_VERBS))
}

/// Classify a customer message. `None` means the message needs the model.
pub fn classify(text: &str) -> Option<Intent> {
    let words = Words::new(text);
    if words.count == 0 {
        return None;
    }

    if let Some(order_number) = find_reference(&ORDER_NUMBER, text) {
        // A negated cancel ("jangan batalkan", "don't cancel") is a status
        // question, never a cancellation.
        return Some(if words.has_unnegated(CANCEL) {
            Intent::CancelOrder { order_number }
        } else if words.has_any(SHIPPING) {
            Intent::Shipping { order_number }
        } else {
            Intent::OrderStatus { order_number }
        });
    }
    if let Some(booking_number) = find_reference(&BOOKING_NUMBER, text) {
        return Some(Intent::BookingStatus { booking_number });
    }

    if words.count <= 12 && asks_for_person(&words) {
        return Some(Intent::HumanAgent);
    }
    if words.count <= 6 && words.has_any(THANKS) {
        return Some(Intent::Thanks);
    }
    if words.count <= 5 && words.has_any(GOODBYE) {
        return Some(Intent::Goodbye);
    }
    if words.count <= 4 && words.has_any(GREETING) {
        return Some(Intent::Greeting);
    }
    if words.count <= 10 && words.has_any(HOURS) {
        return Some(Intent::BusinessHours);
    }
    if words.count <= 10 && words.has_any(LOCATION) {
        return Some(Intent::Location);
    }
    if (words.count <= 10 && words.has_any(SERVICE_PHRASES))
        || (words.count <= 3 && words.has_any(SERVICE_WORDS))
    {
        return Some(Intent::Services);
    }
    None
}
