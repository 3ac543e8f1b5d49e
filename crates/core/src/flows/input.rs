use crate::domain::booking::Slot;
use crate::text::{contains_phrase, word_padded};

/// Shape of a user message as far as the booking flow is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookingInput {
    Affirm,
    Decline,
    Revise(Slot),
    Text,
}

const AFFIRMATIONS: &[&str] = &[
    "yes",
    "y",
    "yeah",
    "yep",
    "yup",
    "sure",
    "ok",
    "okay",
    "confirm",
    "confirmed",
    "correct",
    "go ahead",
    "book it",
    "yes please",
    "نعم",
    "اه",
    "ايوه",
    "ايوا",
    "اكيد",
    "تمام",
    "موافق",
    "اكد",
    "تاكيد",
    "احجز",
];

const DECLINES: &[&str] = &[
    "no",
    "nope",
    "nah",
    "no thanks",
    "no thank you",
    "لا",
    "لأ",
    "لا شكرا",
    "مش موافق",
];

const FILLERS: &[&str] = &["please", "thanks", "thank you", "من فضلك", "لو سمحت", "شكرا"];

const REVISION_MARKERS: &[&str] = &[
    "change",
    "actually",
    "instead",
    "different",
    "another",
    "switch",
    "modify",
    "update",
    "غير",
    "غيري",
    "بدل",
    "بدي اغير",
    "تغيير",
    "عدل",
    "تعديل",
];

const SLOT_KEYWORDS: &[(Slot, &[&str])] = &[
    (Slot::Date, &["date", "day", "تاريخ", "التاريخ", "يوم", "اليوم"]),
    (Slot::Time, &["time", "hour", "وقت", "الوقت", "ساعه", "الساعه"]),
    (Slot::Doctor, &["doctor", "dr", "دكتور", "الدكتور", "طبيب", "الطبيب", "الدكتوره"]),
    (Slot::Service, &["service", "treatment", "خدمه", "الخدمه", "علاج"]),
    (Slot::PatientId, &["id", "identity", "هويه", "الهويه", "رقم الهويه"]),
];

/// Classifies a message inside the booking flow. Whole-message affirmations
/// and declines are recognized after dropping courtesy words; a revision
/// needs both a change marker and a slot keyword.
pub fn parse_input(text: &str) -> BookingInput {
    let padded = word_padded(text);
    let mut core = padded.clone();
    for filler in FILLERS {
        let filler = word_padded(filler);
        while core.contains(&filler) {
            core = core.replacen(&filler, " ", 1);
        }
    }
    let core = core.split_whitespace().collect::<Vec<_>>().join(" ");

    if AFFIRMATIONS.iter().any(|phrase| word_padded(phrase).trim() == core) {
        return BookingInput::Affirm;
    }
    if DECLINES.iter().any(|phrase| word_padded(phrase).trim() == core) {
        return BookingInput::Decline;
    }

    if REVISION_MARKERS.iter().any(|marker| contains_phrase(&padded, marker)) {
        let slot = SLOT_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|keyword| contains_phrase(&padded, keyword)))
            .map(|(slot, _)| *slot);
        if let Some(slot) = slot {
            return BookingInput::Revise(slot);
        }
    }

    BookingInput::Text
}

#[cfg(test)]
mod tests {
    use super::{parse_input, BookingInput};
    use crate::domain::booking::Slot;

    #[test]
    fn whole_message_affirmations_and_declines() {
        assert_eq!(parse_input("Yes"), BookingInput::Affirm);
        assert_eq!(parse_input("yes please!"), BookingInput::Affirm);
        assert_eq!(parse_input("نعم"), BookingInput::Affirm);
        assert_eq!(parse_input("No thanks"), BookingInput::Decline);
        assert_eq!(parse_input("لا"), BookingInput::Decline);
        assert_eq!(parse_input("yes at 3pm"), BookingInput::Text);
    }

    #[test]
    fn revisions_need_a_marker_and_a_slot() {
        assert_eq!(parse_input("actually, change the date"), BookingInput::Revise(Slot::Date));
        assert_eq!(parse_input("can I switch doctor?"), BookingInput::Revise(Slot::Doctor));
        assert_eq!(parse_input("بدي اغير الوقت"), BookingInput::Revise(Slot::Time));
        assert_eq!(parse_input("actually Tuesday"), BookingInput::Text);
    }
}
