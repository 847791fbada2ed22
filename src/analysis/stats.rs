use chrono::NaiveDate;

use crate::error::NullReason;

/// Fewest date-aligned points a pair needs before a coefficient is reported.
pub const MIN_OVERLAP: usize = 5;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((sum_sq / values.len() as f64).sqrt())
}

/// Standard deviation relative to the mean. Needs two points and a
/// non-zero mean.
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    if m == 0.0 {
        return None;
    }
    Some(std_dev(values)? / m.abs())
}

fn is_constant(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] == w[1])
}

/// Divide by the largest magnitude so deviations stay within [-2, 2].
fn scaled(values: &[f64]) -> Vec<f64> {
    let peak = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if peak == 0.0 {
        return values.to_vec();
    }
    values.iter().map(|v| v / peak).collect()
}

/// Inner join of two date-sorted series on date.
pub fn align(a: &[(NaiveDate, f64)], b: &[(NaiveDate, f64)]) -> (Vec<f64>, Vec<f64>) {
    let (mut xs, mut ys) = (Vec::new(), Vec::new());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                xs.push(a[i].1);
                ys.push(b[j].1);
                i += 1;
                j += 1;
            }
        }
    }
    (xs, ys)
}

/// Pearson's r over equal-length samples:
/// r = Σ(x-x̄)(y-ȳ) / (σx·σy·n), with population σ.
///
/// Returns a reason instead of a number when there are fewer than
/// [`MIN_OVERLAP`] finite points or either side is constant. Constant input is
/// detected exactly rather than by a tolerance on σ, since the mean of
/// identical floats need not equal them.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Result<f64, NullReason> {
    let n = xs.len().min(ys.len());
    if n < MIN_OVERLAP {
        return Err(NullReason::InsufficientData);
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    if !xs.iter().chain(ys).all(|v| v.is_finite()) {
        return Err(NullReason::InsufficientData);
    }
    if is_constant(xs) || is_constant(ys) {
        return Err(NullReason::ZeroVariance);
    }

    // r is scale invariant.
    let (xs, ys) = (scaled(xs), scaled(ys));
    let (mx, my) = match (mean(&xs), mean(&ys)) {
        (Some(mx), Some(my)) => (mx, my),
        _ => return Err(NullReason::InsufficientData),
    };
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(&ys) {
        let (dx, dy) = (x - mx, y - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let nf = n as f64;
    let (sigma_x, sigma_y) = ((sxx / nf).sqrt(), (syy / nf).sqrt());
    if sigma_x == 0.0 || sigma_y == 0.0 {
        return Err(NullReason::ZeroVariance);
    }
    let r = sxy / (sigma_x * sigma_y * nf);
    // Spread too small to divide by.
    if !r.is_finite() {
        return Err(NullReason::ZeroVariance);
    }
    Ok(r.clamp(-1.0, 1.0))
}
