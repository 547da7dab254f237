use crate::api::Chapter;
use tracing::warn;

/// Index of the chapter playing at `time`: the last chapter whose timestamp
/// is at or before `time`, or 0 when `time` precedes every chapter.
///
/// Chapter lists are short, so a backward scan is all this needs.
pub fn chapter_index_at(chapters: &[Chapter], time: f64) -> usize {
    chapters
        .iter()
        .rposition(|chapter| chapter.timestamp <= time)
        .unwrap_or(0)
}

/// Order chapters by timestamp and drop boundaries that cannot be seeked to.
///
/// The backend sends them sorted already; this only guards the lookup above.
pub fn normalize_chapters(mut chapters: Vec<Chapter>) -> Vec<Chapter> {
    let before = chapters.len();
    chapters.retain(|chapter| chapter.timestamp.is_finite());
    if chapters.len() != before {
        warn!(
            "Dropped {} chapter(s) with an invalid timestamp",
            before - chapters.len()
        );
    }

    for chapter in &mut chapters {
        if chapter.timestamp < 0.0 {
            chapter.timestamp = 0.0;
        }
    }

    if !chapters
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    {
        warn!("Chapters arrived out of order, sorting by timestamp");
        chapters.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    }

    chapters
}
