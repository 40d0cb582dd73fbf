//! Intent classification tests.

use concierge::chat::patterns::{classify, Intent};

#[test]
fn small_talk_in_both_languages() {
    assert_eq!(classify("Hello!"), Some(Intent::Greeting));
    assert_eq!(classify("selamat pagi kak"), Some(Intent::Greeting));
    assert_eq!(classify("terima kasih banyak"), Some(Intent::Thanks));
    assert_eq!(classify("Thanks!"), Some(Intent::Thanks));
    assert_eq!(classify("ok bye"), Some(Intent::Goodbye));
    assert_eq!(classify("sampai jumpa"), Some(Intent::Goodbye));
}

#[test]
fn greeting_inside_a_real_question_goes_to_the_model() {
    assert_eq!(
        classify("hi, my parcel arrived broken, what should I do now?"),
        None
    );
    assert_eq!(classify("Do you sell decaf beans?"), None);
}

#[test]
fn faq_intents() {
    assert_eq!(classify("What are your opening hours?"), Some(Intent::BusinessHours));
    assert_eq!(classify("jam buka toko kapan ya"), Some(Intent::BusinessHours));
    assert_eq!(classify("alamat tokonya di mana?"), Some(Intent::Location));
    assert_eq!(classify("What services do you offer?"), Some(Intent::Services));
    assert_eq!(classify("layanan"), Some(Intent::Services));
}

#[test]
fn requests_for_a_person() {
    assert_eq!(classify("I want to talk to a human"), Some(Intent::HumanAgent));
    assert_eq!(classify("bisa hubungi CS?"), Some(Intent::HumanAgent));
    assert_eq!(classify("mau bicara dengan petugas"), Some(Intent::HumanAgent));
    assert_eq!(classify("customer service please"), Some(Intent::HumanAgent));
    assert_eq!(classify("admin?"), Some(Intent::HumanAgent));
    // Substrings do not count.
    assert_eq!(classify("what is an agentic workflow"), None);
}

#[test]
fn mentioning_staff_is_not_asking_for_them() {
    assert_eq!(classify("can I become a reseller agent?"), None);
    assert_eq!(classify("is the admin fee included in the price"), None);
    assert_eq!(classify("my cs order code from last week is lost"), None);
}

#[test]
fn order_numbers_win_and_are_uppercased() {
    assert_eq!(
        classify("status pesanan ord-20260115-ab12 dong"),
        Some(Intent::OrderStatus {
            order_number: "ORD-20260115-AB12".to_owned()
        })
    );
    assert_eq!(
        classify("Where is my delivery for ORD-20260115-AB12? hello?"),
        Some(Intent::Shipping {
            order_number: "ORD-20260115-AB12".to_owned()
        })
    );
    assert_eq!(
        classify("tolong batalkan ORD-20260115-AB12"),
        Some(Intent::CancelOrder {
            order_number: "ORD-20260115-AB12".to_owned()
        })
    );
    // A negated cancel only asks for the status.
    for text in [
        "jangan batalkan ORD-20260115-AB12 ya",
        "please don't cancel ORD-20260115-AB12",
        "do not cancel ORD-20260115-AB12, I still want it",
        "ORD-20260115-AB12 tidak usah dibatalkan, tidak jadi batal",
    ] {
        assert_eq!(
            classify(text),
            Some(Intent::OrderStatus {
                order_number: "ORD-20260115-AB12".to_owned()
            }),
            "{text}"
        );
    }
    // A reference beats a request for a person.
    assert_eq!(
        classify("agent please, ORD-20260115-AB12 is late"),
        Some(Intent::OrderStatus {
            order_number: "ORD-20260115-AB12".to_owned()
        })
    );
}

#[test]
fn booking_numbers() {
    assert_eq!(
        classify("is BKG-20260301-ZZ99 confirmed?"),
        Some(Intent::BookingStatus {
            booking_number: "BKG-20260301-ZZ99".to_owned()
        })
    );
    assert_eq!(classify("BKG-2026-ZZ99"), None);
}

#[test]
fn labels_are_stable() {
    assert_eq!(Intent::HumanAgent.label(), "human_agent");
    assert_eq!(
        Intent::CancelOrder {
            order_number: String::new()
        }
        .label(),
        "cancel_order"
    );
}
