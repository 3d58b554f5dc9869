use super::geometry::PartitionExtent;
use super::HdError;

pub const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];
/// Byte offset of the first of the 4 partition entries in sector 0
pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MbrPartition {
    pub boot_ind: u8, // bit 7 set = active
    pub head: u8,     // CHS of the first sector, unused here
    pub sector: u8,
    pub cyl: u8,
    pub sys_ind: u8, // partition type
    pub end_head: u8,
    pub end_sector: u8,
    pub end_cyl: u8,
    pub start_sect: u32, // LBA of partition start
    pub nr_sects: u32,
}
impl MbrPartition {
    pub fn extent(&self) -> PartitionExtent {
        let (start, count) = (self.start_sect, self.nr_sects);
        PartitionExtent::new(u32::from_le(start), u32::from_le(count))
    }
}

pub fn has_signature(sector: &[u8]) -> bool {
    sector.len() >= 512 && sector[510..512] == MBR_SIGNATURE
}

/// Reads the 4 primary entries of a drive's sector 0.
/// Empty entries come out as empty extents.
pub fn parse_partition_table(sector: &[u8], drive: usize) -> Result<[PartitionExtent; 4], HdError> {
    if !has_signature(sector) {
        return Err(HdError::BadPartitionTable { drive });
    }
    let size = core::mem::size_of::<MbrPartition>();
    let mut extents = [PartitionExtent::default(); 4];
    for (i, extent) in extents.iter_mut().enumerate() {
        let start = PARTITION_TABLE_OFFSET + i * size;
        let entry: MbrPartition = bytemuck::pod_read_unaligned(&sector[start..start + size]);
        *extent = entry.extent();
    }
    Ok(extents)
}
