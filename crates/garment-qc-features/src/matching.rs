use crate::brief::BinaryDescriptor;

/// A query→train descriptor correspondence that survived the ratio test.
#[derive(Clone, Copy, Debug)]
pub struct FeatureMatch {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

/// Brute-force k-nearest-neighbor (k=2) Hamming matching with Lowe's ratio
/// rejection: a match is kept only when the best distance is below
/// `ratio * second_best`. Ambiguous descriptors (ratio test fails) and
/// queries against a train set smaller than two produce no match.
pub fn match_descriptors(
    query: &[BinaryDescriptor],
    train: &[BinaryDescriptor],
    ratio: f32,
) -> Vec<FeatureMatch> {
    if train.len() < 2 {
        return Vec::new();
    }

    let mut matches = Vec::new();
    for (qi, qd) in query.iter().enumerate() {
        let mut best = u32::MAX;
        let mut best_idx = 0usize;
        let mut second = u32::MAX;

        for (ti, td) in train.iter().enumerate() {
            let d = qd.hamming(td);
            if d < best {
                second = best;
                best = d;
                best_idx = ti;
            } else if d < second {
                second = d;
            }
        }

        if (best as f32) < ratio * second as f32 {
            matches.push(FeatureMatch {
                query: qi,
                train: best_idx,
                distance: best,
            });
        }
    }
    matches
}
