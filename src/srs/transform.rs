use super::{SrsError, SrsRegistry};
use crate::raster::Extent;
use proj4rs::proj::Proj;

/// proj4 names for geographic (lon/lat) systems
const GEOGRAPHIC_PROJECTIONS: [&str; 4] = ["longlat", "latlong", "lonlat", "latlon"];

/// Check if a proj4 definition describes a geographic (lon/lat) system
pub fn is_geographic(definition: &str) -> bool {
    definition
        .split_whitespace()
        .filter_map(|param| param.strip_prefix("+proj="))
        .any(|name| GEOGRAPHIC_PROJECTIONS.contains(&name))
}

/// Transform an extent between two registered systems.
///
/// The four corners are projected and their envelope returned, which is a best-effort
/// footprint rather than an exact outline of the reprojected area.
pub fn reproject_extent(
    registry: &SrsRegistry,
    extent: Extent,
    from: u32,
    to: u32,
) -> Result<Extent, SrsError> {
    if from == to {
        return Ok(extent);
    }

    let source_def = registry.definition(from).ok_or(SrsError::NotRegistered(from))?;
    let target_def = registry.definition(to).ok_or(SrsError::NotRegistered(to))?;

    let source = Proj::from_proj_string(&source_def).map_err(|e| SrsError::InvalidDefinition {
        code: from,
        message: format!("{e:?}"),
    })?;
    let target = Proj::from_proj_string(&target_def).map_err(|e| SrsError::InvalidDefinition {
        code: to,
        message: format!("{e:?}"),
    })?;

    let source_geographic = is_geographic(&source_def);
    let target_geographic = is_geographic(&target_def);

    let corners = [
        (extent.min_x, extent.min_y),
        (extent.max_x, extent.min_y),
        (extent.min_x, extent.max_y),
        (extent.max_x, extent.max_y),
    ];

    let mut xs = Vec::with_capacity(corners.len());
    let mut ys = Vec::with_capacity(corners.len());

    for (x, y) in corners {
        // proj4rs works in radians for geographic systems
        let mut point = if source_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        proj4rs::transform::transform(&source, &target, &mut point).map_err(|e| {
            SrsError::Transform {
                from,
                to,
                message: format!("{e:?}"),
            }
        })?;

        if target_geographic {
            xs.push(point.0.to_degrees());
            ys.push(point.1.to_degrees());
        } else {
            xs.push(point.0);
            ys.push(point.1);
        }
    }

    let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    Ok(Extent::new(min_x, min_y, max_x, max_y))
}
