//! Canned user-facing messages.
//!
//! The engine decides *which* reply to send; this module owns the wording.

use super::catalog::InputKind;
use super::category::Category;
use super::validator::ValidationFailure;

const FOOTER: &str = "👉 Ketik *MENU* untuk kembali ke menu utama.";

const HELP_BODY: &str = "⚡ Hi! Selamat datang di *Chatbot PPDB* 🎉

📌 *Ketik salah satu kata kunci berikut ini:*

1️⃣ *KUOTA* → Lihat kuota semua jenjang
2️⃣ *BIAYA* → Info biaya per jenjang
3️⃣ *SYARAT* → Persyaratan pendaftaran
4️⃣ *JADWAL* → Jadwal PPDB terbaru
5️⃣ *DAFTAR* → Mulai pendaftaran PPDB
6️⃣ *KONTAK* → Hubungi admin
7️⃣ *BEASISWA* → Info beasiswa";

/// Outcome of handling one inbound message, before wording is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Help,
    /// FAQ lookup result; `None` when no entry exists.
    Faq(Option<String>),
    /// Remaining seats per category; `None` when no quota is configured.
    Quota(Vec<(Category, Option<i64>)>),
    /// Instruction for the step the user should answer next.
    Instruction(String),
    /// The first step could not be resolved, so no session was started.
    StepUnavailable,
    /// The answer was rejected; `instruction` is the step being re-asked.
    Invalid {
        failure: ValidationFailure,
        instruction: String,
    },
    UploadFailed,
    /// The step the user is sitting on no longer resolves.
    InstructionMissing,
    /// A non-terminal step has no successor.
    NextStepMissing,
    Committed,
    CommitFailed,
}

/// Append the navigation footer every outbound message carries.
pub fn with_footer(text: &str) -> String {
    format!("{text}\n\n{FOOTER}")
}

pub fn help_text() -> String {
    with_footer(HELP_BODY)
}

/// Default notice sent to an applicant when an operator changes their record status.
pub fn status_notice(status: &str) -> String {
    match status {
        "approved" => "✅ Selamat! Pendaftaran Anda telah *disetujui*.".to_string(),
        "rejected" => "❌ Mohon maaf, pendaftaran Anda *tidak dapat diterima*.".to_string(),
        other => format!("ℹ️ Status pendaftaran Anda: *{other}*."),
    }
}

fn quota_text(quotas: &[(Category, Option<i64>)]) -> String {
    let mut text = String::from("📊 *Kuota PPDB*\n");
    for (category, remaining) in quotas {
        let line = match remaining {
            Some(0) => format!("\n• {category}: habis"),
            Some(n) => format!("\n• {category}: {n} kursi"),
            None => format!("\n• {category}: belum tersedia"),
        };
        text.push_str(&line);
    }
    text
}

fn failure_text(failure: &ValidationFailure, instruction: &str) -> String {
    match failure {
        ValidationFailure::Empty => format!("❌ Jawaban tidak boleh kosong.\n\n{instruction}"),
        ValidationFailure::BadFormat => {
            "❌ Format salah. Gunakan: #Nama #YYYY-MM-DD #Jenjang #NomorKK".to_string()
        }
        ValidationFailure::BadDate => "❌ Format tanggal salah (YYYY-MM-DD).".to_string(),
        ValidationFailure::BadCategory | ValidationFailure::UnknownCategory => {
            "❌ Jenjang tidak valid. Pilih TK/SD/SMP/SMA.".to_string()
        }
        ValidationFailure::BadIdentifier => "❌ Nomor KK harus 16 digit.".to_string(),
        ValidationFailure::WrongKind { expected, .. } => {
            let noun = match expected {
                InputKind::Document => "dokumen",
                InputKind::Image | InputKind::Text => "gambar",
            };
            format!("❌ Tolong kirim *{noun}* untuk {instruction}")
        }
        ValidationFailure::CategoryLocked { current } => {
            format!("❌ Jenjang sudah dipilih ({current}) dan tidak bisa diubah.")
        }
    }
}

/// Render a reply as the final outbound text.
pub fn render(reply: &Reply) -> String {
    match reply {
        Reply::Help => help_text(),
        Reply::Faq(Some(content)) => with_footer(content),
        Reply::Faq(None) => with_footer("❌ Info belum tersedia."),
        Reply::Quota(quotas) => with_footer(&quota_text(quotas)),
        Reply::Instruction(text) => with_footer(text),
        Reply::StepUnavailable => with_footer("⚠️ Langkah 1 belum tersedia."),
        Reply::Invalid {
            failure,
            instruction,
        } => with_footer(&failure_text(failure, instruction)),
        Reply::UploadFailed => with_footer("❌ Gagal upload file. Coba lagi."),
        Reply::InstructionMissing => {
            with_footer("⚠️ Instruksi step tidak ditemukan. Hubungi admin.")
        }
        Reply::NextStepMissing => {
            with_footer("⚠️ Instruksi berikutnya tidak ditemukan. Hubungi admin.")
        }
        Reply::Committed => with_footer("✅ Pendaftaran berhasil! Terima kasih."),
        Reply::CommitFailed => with_footer("❌ Gagal simpan pendaftaran. Hubungi admin."),
    }
}
