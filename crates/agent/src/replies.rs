use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};

use noor_core::catalog::{DoctorRoster, ServiceCatalog, ANY_DOCTOR};
use noor_core::dates::{BusinessHours, UnresolvedReason};
use noor_core::domain::booking::{BookingSlots, ConfirmedBooking, ServiceSelection, Slot};
use noor_core::domain::session::Language;
use noor_core::flows::RejectionReason;

/// Bilingual reply texts for the booking flow and the fixed fallbacks.
#[derive(Clone, Debug)]
pub struct ReplyComposer {
    catalog: ServiceCatalog,
    roster: DoctorRoster,
    hours: BusinessHours,
}

impl ReplyComposer {
    pub fn new(catalog: ServiceCatalog, roster: DoctorRoster, hours: BusinessHours) -> Self {
        Self { catalog, roster, hours }
    }

    pub fn prompt_for(&self, slot: Slot, language: Language) -> String {
        match (slot, language) {
            (Slot::Service, Language::English) => {
                let names: Vec<&str> =
                    self.catalog.services().iter().map(|service| service.name.as_str()).collect();
                format!("Which service would you like to book? We offer: {}.", names.join(", "))
            }
            (Slot::Service, Language::Arabic) => {
                let names: Vec<&str> = self
                    .catalog
                    .services()
                    .iter()
                    .map(|service| service.name_ar.as_str())
                    .collect();
                format!("أي خدمة بتحب تحجز؟ الخدمات المتوفرة: {}.", names.join("، "))
            }
            (Slot::Date, Language::English) => {
                "Which day suits you? For example: tomorrow, next Monday or 20/10.".to_owned()
            }
            (Slot::Date, Language::Arabic) => {
                "أي يوم بناسبك؟ مثلاً: بكرة، الاثنين الجاي أو 20/10.".to_owned()
            }
            (Slot::Time, Language::English) => format!(
                "What time would you prefer? We are open from {} to {}.",
                clock(self.hours.opening),
                clock(self.hours.closing)
            ),
            (Slot::Time, Language::Arabic) => format!(
                "أي ساعة بتناسبك؟ دوامنا من {} لـ {}.",
                clock(self.hours.opening),
                clock(self.hours.closing)
            ),
            (Slot::Doctor, language) => {
                let names: Vec<&str> =
                    self.roster.doctors().iter().map(|doctor| doctor.name.as_str()).collect();
                match language {
                    Language::English => format!(
                        "Which doctor would you like to see? {}, or any available doctor.",
                        names.join(", ")
                    ),
                    Language::Arabic => format!(
                        "عند أي دكتور بتحب يكون الموعد؟ {}، أو أي دكتور متوفر.",
                        names.join("، ")
                    ),
                }
            }
            (Slot::PatientId, Language::English) => {
                "Please send your ID number so I can attach the booking to your file.".to_owned()
            }
            (Slot::PatientId, Language::Arabic) => {
                "لو سمحت ابعتلي رقم هويتك عشان أربط الموعد بملفك.".to_owned()
            }
        }
    }

    pub fn rejection(&self, reason: &RejectionReason, language: Language) -> String {
        let english = language == Language::English;
        match reason {
            RejectionReason::UnknownService if english => {
                "Sorry, we don't offer that service.".to_owned()
            }
            RejectionReason::UnknownService => "عذراً، هاي الخدمة مش متوفرة عنا.".to_owned(),
            RejectionReason::UnresolvedDate(UnresolvedReason::Past) if english => {
                "That date has already passed.".to_owned()
            }
            RejectionReason::UnresolvedDate(UnresolvedReason::Past) => {
                "هذا التاريخ صار بالماضي.".to_owned()
            }
            RejectionReason::UnresolvedDate(UnresolvedReason::InvalidCalendarDate) if english => {
                "That date doesn't exist on the calendar.".to_owned()
            }
            RejectionReason::UnresolvedDate(UnresolvedReason::InvalidCalendarDate) => {
                "هذا التاريخ مش موجود بالتقويم.".to_owned()
            }
            RejectionReason::UnresolvedDate(UnresolvedReason::NoMatch) if english => {
                "I couldn't work out the date.".to_owned()
            }
            RejectionReason::UnresolvedDate(UnresolvedReason::NoMatch) => {
                "ما قدرت أفهم التاريخ.".to_owned()
            }
            RejectionReason::ClinicClosed(weekday) if english => {
                format!("The clinic is closed on {}s.", weekday_name(*weekday, language))
            }
            RejectionReason::ClinicClosed(weekday) => {
                format!("العيادة مسكرة يوم {}.", weekday_name(*weekday, language))
            }
            RejectionReason::UnparseableTime if english => {
                "I couldn't work out the time.".to_owned()
            }
            RejectionReason::UnparseableTime => "ما قدرت أفهم الساعة.".to_owned(),
            RejectionReason::OutsideBusinessHours if english => format!(
                "That time is outside our working hours ({} to {}).",
                clock(self.hours.opening),
                clock(self.hours.closing)
            ),
            RejectionReason::OutsideBusinessHours => format!(
                "هاي الساعة برا الدوام (من {} لـ {}).",
                clock(self.hours.opening),
                clock(self.hours.closing)
            ),
            RejectionReason::NotInFuture if english => "That time has already passed.".to_owned(),
            RejectionReason::NotInFuture => "هاد الوقت صار بالماضي.".to_owned(),
            RejectionReason::UnknownDoctor if english => {
                "I couldn't find that doctor in our team.".to_owned()
            }
            RejectionReason::UnknownDoctor => "ما لقيت هالدكتور بفريقنا.".to_owned(),
            RejectionReason::InvalidPatientId if english => {
                "That doesn't look like a valid ID number.".to_owned()
            }
            RejectionReason::InvalidPatientId => "رقم الهوية مش واضح.".to_owned(),
            RejectionReason::ConfirmationUnclear if english => {
                "Please reply yes to confirm or no to cancel.".to_owned()
            }
            RejectionReason::ConfirmationUnclear => "رد بـ نعم للتأكيد أو لا للإلغاء.".to_owned(),
            RejectionReason::NothingToRevise if english => {
                "There is nothing to change there yet.".to_owned()
            }
            RejectionReason::NothingToRevise => "لسا ما في إشي نغيره هون.".to_owned(),
        }
    }

    pub fn confirmation_summary(&self, slots: &BookingSlots, language: Language) -> String {
        let service = slots
            .service
            .as_ref()
            .map(|service| self.service_name(service, language))
            .unwrap_or_default();
        let date = slots.date.map(|date| long_date(date, language)).unwrap_or_default();
        let time = slots.time.map(clock).unwrap_or_default();
        let doctor =
            slots.doctor.as_deref().map(|doctor| doctor_name(doctor, language)).unwrap_or_default();
        let patient_id =
            slots.patient_id.as_ref().map(|id| id.0.clone()).unwrap_or_default();
        let terms = slots
            .service
            .as_ref()
            .and_then(|service| self.catalog.find(&service.code))
            .map(|definition| match language {
                Language::English => format!(
                    "\n• Duration: {} min\n• Price: {}",
                    definition.duration_minutes, definition.price
                ),
                Language::Arabic => format!(
                    "\n• المدة: {} دقيقة\n• السعر: {}",
                    definition.duration_minutes, definition.price
                ),
            })
            .unwrap_or_default();

        match language {
            Language::English => format!(
                "Here is your booking:\n• Service: {service}{terms}\n• Date: {date}\n• Time: {time}\n• Doctor: {doctor}\n• ID: {patient_id}\nShall I confirm it? (yes / no)"
            ),
            Language::Arabic => format!(
                "هاي تفاصيل موعدك:\n• الخدمة: {service}{terms}\n• التاريخ: {date}\n• الساعة: {time}\n• الدكتور: {doctor}\n• رقم الهوية: {patient_id}\nبتأكد الحجز؟ (نعم / لا)"
            ),
        }
    }

    pub fn confirmed(&self, booking: &ConfirmedBooking, language: Language) -> String {
        let date = long_date(booking.request.date, language);
        let time = clock(booking.request.time);
        match language {
            Language::English => format!(
                "Your appointment is confirmed for {date} at {time}. Reference: {}.",
                booking.receipt.reference
            ),
            Language::Arabic => format!(
                "تم تأكيد موعدك يوم {date} الساعة {time}. رقم الحجز: {}.",
                booking.receipt.reference
            ),
        }
    }

    pub fn already_confirmed(&self, booking: &ConfirmedBooking, language: Language) -> String {
        match language {
            Language::English => format!(
                "This appointment is already confirmed (reference {}). Nothing else is needed.",
                booking.receipt.reference
            ),
            Language::Arabic => format!(
                "الموعد مأكد من قبل (رقم الحجز {}). ما في داعي لإشي ثاني.",
                booking.receipt.reference
            ),
        }
    }

    pub fn welcome_back(&self, name: &str, language: Language) -> String {
        match language {
            Language::English => format!("Welcome back, {name}!"),
            Language::Arabic => format!("أهلاً فيك من جديد يا {name}!"),
        }
    }

    pub fn directory_miss(&self, language: Language) -> String {
        let lead = match language {
            Language::English => "I couldn't find a patient file linked to this number.",
            Language::Arabic => "ما لقيت ملف مربوط بهالرقم.",
        };
        format!("{lead} {}", self.prompt_for(Slot::PatientId, language))
    }

    pub fn cancelled(&self, language: Language) -> String {
        match language {
            Language::English => {
                "Your booking has been cancelled. Message us anytime to book again.".to_owned()
            }
            Language::Arabic => "تم إلغاء الحجز. راسلنا بأي وقت إذا بدك تحجز من جديد.".to_owned(),
        }
    }

    pub fn nothing_to_cancel(&self, language: Language) -> String {
        match language {
            Language::English => "There is no booking in progress. How can I help?".to_owned(),
            Language::Arabic => "ما في حجز قيد التنفيذ. كيف بقدر أساعدك؟".to_owned(),
        }
    }

    pub fn directory_retry(&self, language: Language) -> String {
        match language {
            Language::English => "I couldn't reach our patient records just now. Please send any message in a moment and I'll try again.".to_owned(),
            Language::Arabic => "ما قدرت أوصل لسجلات المرضى هلأ. ابعت أي رسالة بعد شوي وبجرب مرة ثانية.".to_owned(),
        }
    }

    pub fn submit_retry(&self, language: Language) -> String {
        match language {
            Language::English => "I couldn't complete the booking just now. Please reply yes again in a moment.".to_owned(),
            Language::Arabic => "ما قدرت أكمل الحجز هلأ. رد بـ نعم مرة ثانية بعد شوي.".to_owned(),
        }
    }

    pub fn upstream_retry(&self, language: Language) -> String {
        match language {
            Language::English => "I can't answer that right now. Please try again in a moment.".to_owned(),
            Language::Arabic => "ما بقدر أجاوب هلأ. جرب مرة ثانية بعد شوي.".to_owned(),
        }
    }

    pub fn apology(&self, language: Language) -> String {
        match language {
            Language::English => "Sorry, something went wrong on our side. Please try again later.".to_owned(),
            Language::Arabic => "عذراً، صار خلل عنا. جرب مرة ثانية لاحقاً.".to_owned(),
        }
    }

    fn service_name(&self, service: &ServiceSelection, language: Language) -> String {
        match (language, self.catalog.find(&service.code)) {
            (Language::Arabic, Some(definition)) => definition.name_ar.clone(),
            _ => service.name.clone(),
        }
    }
}

fn doctor_name(doctor: &str, language: Language) -> String {
    match language {
        Language::Arabic if doctor == ANY_DOCTOR => "أي دكتور متوفر".to_owned(),
        _ => doctor.to_owned(),
    }
}

fn clock(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

fn long_date(date: NaiveDate, language: Language) -> String {
    match language {
        Language::English => date.format("%A %-d %B %Y").to_string(),
        Language::Arabic => {
            format!("{} {}", weekday_name(date.weekday(), language), date.format("%d/%m/%Y"))
        }
    }
}

fn weekday_name(weekday: Weekday, language: Language) -> &'static str {
    match language {
        Language::English => match weekday {
            Weekday::Mon => "Monday",
            Weekday::Tue => "Tuesday",
            Weekday::Wed => "Wednesday",
            Weekday::Thu => "Thursday",
            Weekday::Fri => "Friday",
            Weekday::Sat => "Saturday",
            Weekday::Sun => "Sunday",
        },
        Language::Arabic => match weekday {
            Weekday::Mon => "الاثنين",
            Weekday::Tue => "الثلاثاء",
            Weekday::Wed => "الأربعاء",
            Weekday::Thu => "الخميس",
            Weekday::Fri => "الجمعة",
            Weekday::Sat => "السبت",
            Weekday::Sun => "الأحد",
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, Weekday};

    use noor_core::catalog::{DoctorRoster, ServiceCatalog, ANY_DOCTOR};
    use noor_core::dates::BusinessHours;
    use noor_core::domain::booking::{BookingSlots, ServiceSelection, Slot};
    use noor_core::domain::patient::PatientId;
    use noor_core::domain::session::Language;
    use noor_core::flows::RejectionReason;

    use super::ReplyComposer;

    fn composer() -> ReplyComposer {
        ReplyComposer::new(
            ServiceCatalog::default(),
            DoctorRoster::default(),
            BusinessHours::default(),
        )
    }

    #[test]
    fn prompts_list_catalog_and_roster_in_both_languages() {
        let composer = composer();

        assert!(composer.prompt_for(Slot::Service, Language::English).contains("Dental cleaning"));
        assert!(composer.prompt_for(Slot::Service, Language::Arabic).contains("تنظيف الأسنان"));
        assert!(composer.prompt_for(Slot::Doctor, Language::English).contains("Dr. Samer"));
        assert!(composer.prompt_for(Slot::Time, Language::English).contains("09:00 to 21:00"));
    }

    #[test]
    fn closed_weekday_rejection_names_the_day() {
        let composer = composer();
        let reason = RejectionReason::ClinicClosed(Weekday::Fri);

        assert_eq!(composer.rejection(&reason, Language::English), "The clinic is closed on Fridays.");
        assert!(composer.rejection(&reason, Language::Arabic).contains("الجمعة"));
    }

    #[test]
    fn confirmation_summary_lists_every_slot() {
        let slots = BookingSlots {
            service: Some(ServiceSelection {
                code: "dental_cleaning".into(),
                name: "Dental cleaning".into(),
            }),
            date: NaiveDate::from_ymd_opt(2026, 10, 19),
            time: NaiveTime::from_hms_opt(15, 0, 0),
            doctor: Some(ANY_DOCTOR.into()),
            patient_id: Some(PatientId("401234567".into())),
        };

        let english = composer().confirmation_summary(&slots, Language::English);
        assert!(english.contains("Dental cleaning"));
        assert!(english.contains("Monday 19 October 2026"));
        assert!(english.contains("15:00"));
        assert!(english.contains("401234567"));
        assert!(english.contains("• Duration: 45 min\n• Price: 150"));

        let arabic = composer().confirmation_summary(&slots, Language::Arabic);
        assert!(arabic.contains("تنظيف الأسنان"));
        assert!(arabic.contains("الاثنين 19/10/2026"));
        assert!(arabic.contains("أي دكتور متوفر"));
        assert!(arabic.contains("المدة: 45 دقيقة"));
    }

    #[test]
    fn confirmation_summary_skips_terms_for_unknown_services() {
        let slots = BookingSlots {
            service: Some(ServiceSelection { code: "retired".into(), name: "Old service".into() }),
            ..BookingSlots::default()
        };

        let english = composer().confirmation_summary(&slots, Language::English);
        assert!(english.contains("• Service: Old service\n• Date:"));
        assert!(!english.contains("Price"));
    }
}
