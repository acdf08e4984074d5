//! Canned-response assistant for the storefront chat widget.

use crate::common::{AuthError, Result};

pub const GREETING: &str = "Hello! How can I help you today? Feel free to ask me about our food delivery service.";

const FALLBACK: &str = "I'm not sure I understood that. You can ask me about tracking an order, \
delivery times, payments, refunds, our menus or becoming a restaurant partner.";

struct Rule {
    keywords: &'static [&'static str],
    reply: &'static str,
}

// First match wins, so narrower topics come before broader ones.
const RULES: &[Rule] = &[
    Rule {
        keywords: &["refund", "money back", "cancel"],
        reply: "Orders can be cancelled before the restaurant accepts them. Refunds for cancelled or \
                incorrect orders go back to your original payment method within 5-7 business days.",
    },
    Rule {
        keywords: &["track", "where is my order", "order status"],
        reply: "You can follow your order live from the Orders page in your dashboard. \
                We'll also notify you when it's picked up and when it's nearby.",
    },
    Rule {
        keywords: &["how long", "delivery time", "eta", "when will"],
        reply: "Most orders arrive within 30-45 minutes. Times can be longer during peak hours or bad weather.",
    },
    Rule {
        keywords: &["pay", "payment", "paying", "paid", "card", "upi", "cash", "wallet"],
        reply: "We accept credit and debit cards, UPI, wallets and cash on delivery in most cities.",
    },
    Rule {
        keywords: &["partner", "list my restaurant", "restaurant owner", "register restaurant"],
        reply: "Restaurant owners can sign up with the restaurant owner role and manage their menu \
                and orders from the dashboard.",
    },
    Rule {
        keywords: &["menu", "dish", "food", "cuisine", "vegetarian", "vegan"],
        reply: "Browse restaurants near you and open any of them to see the full menu, \
                with filters for cuisine and dietary preferences.",
    },
    Rule {
        keywords: &["face", "login", "log in", "sign in", "password"],
        reply: "You can sign in with your email and password, or with Face ID if you registered a face at signup.",
    },
    Rule {
        keywords: &["contact", "support", "help", "human", "agent"],
        reply: "You can reach our support team at support@foodgate.example or from the Help section of the app.",
    },
    Rule {
        keywords: &["hello", "hi", "hey", "good morning", "good evening"],
        reply: "Hi there! How can I help you with your food delivery today?",
    },
];

#[derive(Debug, Default, Clone, Copy)]
pub struct ChatResponder;

impl ChatResponder {
    pub fn new() -> Self {
        Self
    }

    pub fn reply(&self, message: &str) -> Result<&'static str> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AuthError::InvalidInput("Please enter a message".into()));
        }

        let lowered = message.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let reply = RULES
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| matches_keyword(&lowered, &words, k)))
            .map(|rule| rule.reply)
            .unwrap_or(FALLBACK);
        Ok(reply)
    }
}

/// Single words must match a whole word; phrases match as substrings.
fn matches_keyword(lowered: &str, words: &[&str], keyword: &str) -> bool {
    if keyword.contains(' ') {
        lowered.contains(keyword)
    } else {
        words.iter().any(|w| *w == keyword || (keyword.len() > 3 && w.starts_with(keyword)))
    }
}
