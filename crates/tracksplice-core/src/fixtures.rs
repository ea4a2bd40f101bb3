use crate::session::{EditError, Session, TrackId};

pub const JINGLE_TARGET: [i16; 13] = [3, 18, 11, -8, 5, -1, -18, -15, 0, -6, -5, -14, 4];
pub const JINGLE_AD: [i16; 3] = [-18, -15, 0];

#[derive(Debug, Clone)]
pub struct JingleFixture {
    pub session: Session,
    pub target: TrackId,
    pub ad: TrackId,
}

/// A recording with the jingle embedded once at samples 6..=8.
#[must_use]
pub fn jingle_session() -> JingleFixture {
    let mut session = Session::new();
    let target = session
        .load_samples(&JINGLE_TARGET)
        .expect("fixture target should load");
    let ad = session
        .load_samples(&JINGLE_AD)
        .expect("fixture ad should load");
    JingleFixture {
        session,
        target,
        ad,
    }
}

#[derive(Debug, Clone)]
pub struct DemoEdits {
    pub session: Session,
    pub excerpt: TrackId,
    pub main: TrackId,
    pub donor: TrackId,
    pub scratch: TrackId,
}

/// Four tracks edited through a chain of aliases: `excerpt` aliases a
/// stretch of `main` that itself contains an alias of `donor`, so a write to
/// any of the three shows up in the others.
pub fn demo_edits() -> Result<DemoEdits, EditError> {
    let mut session = Session::new();
    let excerpt = session.init_track();
    session.write(excerpt, 0, &[])?;
    let main = session.load_samples(&JINGLE_TARGET)?;
    let donor = session.load_samples(&[2, 19, 5, 13, -10, -3])?;
    let scratch = session.load_samples(&[-9, -5, 20, -12, 0, -18, -1, -19, -6])?;
    session.write(scratch, 0, &[11, 5, -2, 7, -15, 8, -13, -1, 7])?;

    session.insert(donor, main, 9, 1, 1)?;
    session.write(donor, 0, &[-20, 5, 12, 0, 11, -11])?;
    session.write(scratch, 0, &[-12, -18, -14, -10, 5, -9, 8, 16, -6])?;
    session.delete_range(scratch, 5, 3)?;
    session.insert(main, excerpt, 0, 7, 3)?;
    session.write(
        main,
        0,
        &[-10, -6, -7, 18, 2, -12, 12, 16, -15, -13, 20, -17, 17, 1],
    )?;
    session.write(excerpt, 0, &[17, -16, -11])?;

    Ok(DemoEdits {
        session,
        excerpt,
        main,
        donor,
        scratch,
    })
}
