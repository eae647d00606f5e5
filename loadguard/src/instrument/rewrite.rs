//! Call-site rewriting

use tracing::trace;

use crate::ir::{FuncId, InsertPoint, IrBuilder, Operand};

use super::scan::LoadSite;
use super::InstrumentError;

/// Insert `icmp eq addr, null` and a call to `guard` immediately before
/// the load at `point`. Both instructions carry the load's location.
///
/// Returns how many instructions were inserted.
pub fn rewrite_site(
    builder: &mut IrBuilder<'_>,
    site: &LoadSite,
    point: InsertPoint,
    guard: FuncId,
) -> Result<usize, InstrumentError> {
    builder.position_before(point);
    builder.set_location(site.loc);

    let null = Operand::null(site.addr.ty.clone());
    let is_null = builder.build_icmp_eq(site.addr.clone(), null, "isnull")?;
    builder.build_call(guard, vec![is_null], None)?;

    let inserted = builder.insert_point().map_or(0, |p| p.index - point.index);
    trace!(
        function = %builder.module().function(point.func).name,
        index = point.index,
        inserted,
        "guarded load"
    );
    Ok(inserted)
}
