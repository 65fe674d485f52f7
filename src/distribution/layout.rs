//! Moving overlap regions between local buffers
//!
//! Every participant stores its block row-major: the element for global point
//! `p` sits at `local.local_offset(p) * element_size`. A region produced by the
//! overlap calculator is a sub-lattice of both blocks, so it can be packed out
//! of the provider's buffer and unpacked into the consumer's buffer without
//! either side knowing the other's layout.

use crate::distribution::DistributionDescriptor;
use crate::error::{RedistError, Result};

fn check_buffer(local: &DistributionDescriptor, element_size: usize, actual: usize) -> Result<()> {
    let expected = local.len() * element_size as u64;
    if expected != actual as u64 {
        return Err(RedistError::BufferSize { expected, actual });
    }
    Ok(())
}

fn check_dimensions(local: &DistributionDescriptor, region: &DistributionDescriptor) -> Result<()> {
    if local.dimensions() != region.dimensions() {
        return Err(RedistError::MismatchedDimensionality {
            left: local.dimensions(),
            right: region.dimensions(),
        });
    }
    Ok(())
}

/// Pack the elements of `region` out of the provider's local buffer
///
/// The packed block lists the region's points in row-major order.
pub fn extract(
    local: &DistributionDescriptor,
    region: &DistributionDescriptor,
    element_size: usize,
    data: &[u8],
) -> Result<Vec<u8>> {
    check_dimensions(local, region)?;
    check_buffer(local, element_size, data.len())?;

    let mut packed = Vec::with_capacity(region.len() as usize * element_size);
    for point in region.points() {
        let offset = local
            .local_offset(&point)
            .ok_or_else(|| RedistError::Protocol(format!("point {:?} outside local block", point)))?
            as usize
            * element_size;
        packed.extend_from_slice(&data[offset..offset + element_size]);
    }

    Ok(packed)
}

/// Unpack a packed region into the consumer's local buffer
pub fn scatter(
    local: &DistributionDescriptor,
    region: &DistributionDescriptor,
    element_size: usize,
    block: &[u8],
    out: &mut [u8],
) -> Result<()> {
    check_dimensions(local, region)?;
    check_buffer(local, element_size, out.len())?;
    check_buffer(region, element_size, block.len())?;

    for (i, point) in region.points().enumerate() {
        let offset = local
            .local_offset(&point)
            .ok_or_else(|| RedistError::Protocol(format!("point {:?} outside local block", point)))?
            as usize
            * element_size;
        let src = i * element_size;
        out[offset..offset + element_size].copy_from_slice(&block[src..src + element_size]);
    }

    Ok(())
}
