//! Containment testing of a single position against a single geofence.

use super::types::{Containment, Geofence};
use crate::location::{haversine_distance, Position};

/// Decides whether `position` lies inside `geofence`.
///
/// The distance to the center is compared with the radius. When the fix
/// carries an accuracy radius and the boundary lies within that accuracy
/// (`|distance - radius| <= accuracy`), the answer is
/// [`Containment::Unknown`]: a noisy fix must not produce a transition.
/// Invalid fixes are also `Unknown`.
///
/// Pure: depends only on its inputs.
///
/// # Examples
///
/// ```
/// use geofence_core::geofence::{evaluate, Containment, Geofence};
/// use geofence_core::location::{destination, Position};
///
/// let fence = Geofence::new("home", 0.0, 0.0, 100.0);
///
/// let (lat, lon) = destination(0.0, 0.0, 0.0, 50.0);
/// assert_eq!(evaluate(&Position::new(lat, lon), &fence), Containment::Inside);
///
/// // 90m from the boundary with a 120m accuracy radius: ambiguous
/// let (lat, lon) = destination(0.0, 0.0, 0.0, 10.0);
/// let noisy = Position::new(lat, lon).with_accuracy(120.0);
/// assert_eq!(evaluate(&noisy, &fence), Containment::Unknown);
/// ```
#[must_use]
pub fn evaluate(position: &Position, geofence: &Geofence) -> Containment {
    if !position.is_valid() {
        return Containment::Unknown;
    }

    let accuracy = match position.accuracy {
        Some(a) if !a.is_finite() => return Containment::Unknown,
        Some(a) => a.max(0.0),
        None => 0.0,
    };

    let distance = haversine_distance(
        geofence.latitude,
        geofence.longitude,
        position.latitude,
        position.longitude,
    );

    if accuracy > 0.0 && (distance - geofence.radius_meters).abs() <= accuracy {
        Containment::Unknown
    } else if distance <= geofence.radius_meters {
        Containment::Inside
    } else {
        Containment::Outside
    }
}
