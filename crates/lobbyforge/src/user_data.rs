//! Placement of game session data in room attributes.
//!
//! `Int32` items take the searchable integer attributes in registration
//! order. Everything else (and `Int32` items once those run out) is packed
//! little-endian into the binary attribute bucket.

use lobbyforge_protocol::{
    AttributeFilter, BINARY_ATTRIBUTE_LEN, RoomAttributes, SEARCHABLE_ATTRIBUTE_COUNT,
    SearchFilter, SessionUserData, UserDataDescriptor, UserDataId, UserDataType, UserDataValue,
};

use crate::LobbyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Searchable(usize),
    Binary { offset: usize },
}

/// The registered session data items and where each one lives.
#[derive(Debug, Clone, Default)]
pub(crate) struct UserDataLayout {
    items: Vec<(UserDataDescriptor, Placement)>,
    binary_len: usize,
}

impl UserDataLayout {
    /// # Errors
    /// - [`LobbyError::InvalidParam`] if an id is registered twice.
    /// - [`LobbyError::OutOfSessionUserData`] if the binary bucket
    ///   overflows.
    pub(crate) fn new(descriptors: &[UserDataDescriptor]) -> Result<Self, LobbyError> {
        let mut layout = Self::default();
        let mut next_slot = 0;
        for descriptor in descriptors {
            if layout.find(descriptor.id).is_some() {
                return Err(LobbyError::InvalidParam);
            }
            let placement =
                if descriptor.ty == UserDataType::Int32 && next_slot < SEARCHABLE_ATTRIBUTE_COUNT {
                    next_slot += 1;
                    Placement::Searchable(next_slot - 1)
                } else {
                    let offset = layout.binary_len;
                    let end = offset + descriptor.ty.size();
                    if end > BINARY_ATTRIBUTE_LEN {
                        return Err(LobbyError::OutOfSessionUserData);
                    }
                    layout.binary_len = end;
                    Placement::Binary { offset }
                };
            layout.items.push((*descriptor, placement));
        }
        Ok(layout)
    }

    fn find(&self, id: UserDataId) -> Option<(UserDataDescriptor, Placement)> {
        self.items.iter().find(|(d, _)| d.id == id).copied()
    }

    /// Builds the attributes carrying `data`. Slots not mentioned stay
    /// unset.
    ///
    /// # Errors
    /// - [`LobbyError::UserDataNotRegistered`] for an unknown id.
    /// - [`LobbyError::InvalidParam`] if a value's type differs from its
    ///   registration.
    pub(crate) fn encode(&self, data: &[SessionUserData]) -> Result<RoomAttributes, LobbyError> {
        let mut attributes = RoomAttributes::default();
        for item in data {
            let (descriptor, placement) =
                self.find(item.id).ok_or(LobbyError::UserDataNotRegistered)?;
            if item.value.data_type() != descriptor.ty {
                return Err(LobbyError::InvalidParam);
            }
            match (placement, item.value) {
                (Placement::Searchable(slot), UserDataValue::Int32(v)) => {
                    attributes.searchable[slot] = Some(v);
                }
                (Placement::Searchable(_), _) => return Err(LobbyError::InvalidParam),
                (Placement::Binary { offset }, value) => {
                    if attributes.binary.is_empty() {
                        attributes.binary = vec![0; self.binary_len];
                    }
                    value.write_le(&mut attributes.binary[offset..offset + descriptor.ty.size()]);
                }
            }
        }
        Ok(attributes)
    }

    /// Reads back every registered item present in `attributes`.
    pub(crate) fn decode(&self, attributes: &RoomAttributes) -> Vec<SessionUserData> {
        self.items
            .iter()
            .filter_map(|(descriptor, placement)| {
                let value = match *placement {
                    Placement::Searchable(slot) => {
                        attributes.searchable[slot].map(UserDataValue::Int32)
                    }
                    Placement::Binary { offset } => attributes
                        .binary
                        .get(offset..)
                        .and_then(|bytes| UserDataValue::read_le(descriptor.ty, bytes)),
                }?;
                Some(SessionUserData {
                    id: descriptor.id,
                    value,
                })
            })
            .collect()
    }

    /// Translates search filters to attribute filters.
    ///
    /// # Errors
    /// - [`LobbyError::UserDataNotRegistered`] for an unknown id.
    /// - [`LobbyError::InvalidParam`] for an item that is not searchable.
    pub(crate) fn filters(&self, filters: &[SearchFilter]) -> Result<Vec<AttributeFilter>, LobbyError> {
        filters
            .iter()
            .map(|filter| match self.find(filter.id) {
                None => Err(LobbyError::UserDataNotRegistered),
                Some((_, Placement::Searchable(slot))) => Ok(AttributeFilter {
                    slot,
                    op: filter.op,
                    value: filter.value,
                }),
                Some((_, Placement::Binary { .. })) => Err(LobbyError::InvalidParam),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use lobbyforge_protocol::CompareOp;

    use super::*;

    fn descriptor(id: u32, ty: UserDataType) -> UserDataDescriptor {
        UserDataDescriptor {
            id: UserDataId(id),
            ty,
        }
    }

    fn layout() -> UserDataLayout {
        UserDataLayout::new(&[
            descriptor(1, UserDataType::Int32),
            descriptor(2, UserDataType::Float64),
            descriptor(3, UserDataType::Int32),
            descriptor(4, UserDataType::Int8),
        ])
        .unwrap()
    }

    #[test]
    fn test_new_places_int32_in_searchable_slots() {
        let layout = layout();
        assert_eq!(layout.find(UserDataId(1)).unwrap().1, Placement::Searchable(0));
        assert_eq!(layout.find(UserDataId(3)).unwrap().1, Placement::Searchable(1));
        assert_eq!(layout.find(UserDataId(2)).unwrap().1, Placement::Binary { offset: 0 });
        assert_eq!(layout.find(UserDataId(4)).unwrap().1, Placement::Binary { offset: 8 });
    }

    #[test]
    fn test_new_ninth_int32_goes_binary() {
        let descriptors: Vec<_> = (0..9).map(|id| descriptor(id, UserDataType::Int32)).collect();
        let layout = UserDataLayout::new(&descriptors).unwrap();
        assert_eq!(layout.find(UserDataId(8)).unwrap().1, Placement::Binary { offset: 0 });
    }

    #[test]
    fn test_new_binary_overflow_rejected() {
        let descriptors: Vec<_> = (0..65).map(|id| descriptor(id, UserDataType::Int64)).collect();
        assert!(matches!(
            UserDataLayout::new(&descriptors),
            Err(LobbyError::OutOfSessionUserData)
        ));
    }

    #[test]
    fn test_new_duplicate_id_rejected() {
        let descriptors = [descriptor(1, UserDataType::Int8), descriptor(1, UserDataType::Int32)];
        assert!(matches!(UserDataLayout::new(&descriptors), Err(LobbyError::InvalidParam)));
    }

    #[test]
    fn test_encode_decode_mixed_items() {
        let layout = layout();
        let data = vec![
            SessionUserData::new(1, UserDataValue::Int32(7)),
            SessionUserData::new(2, UserDataValue::Float64(0.5)),
            SessionUserData::new(4, UserDataValue::Int8(-3)),
        ];
        let attributes = layout.encode(&data).unwrap();
        assert_eq!(attributes.searchable[0], Some(7));
        assert_eq!(attributes.searchable[1], None);
        assert_eq!(layout.decode(&attributes), data);
    }

    #[test]
    fn test_encode_unregistered_id_rejected() {
        let err = layout()
            .encode(&[SessionUserData::new(9, UserDataValue::Int32(1))])
            .unwrap_err();
        assert!(matches!(err, LobbyError::UserDataNotRegistered));
    }

    #[test]
    fn test_encode_type_mismatch_rejected() {
        let err = layout()
            .encode(&[SessionUserData::new(1, UserDataValue::Int64(1))])
            .unwrap_err();
        assert!(matches!(err, LobbyError::InvalidParam));
    }

    #[test]
    fn test_filters_map_to_slots() {
        let filters = layout()
            .filters(&[SearchFilter {
                id: UserDataId(3),
                op: CompareOp::Ge,
                value: 2,
            }])
            .unwrap();
        assert_eq!(filters[0].slot, 1);
        assert_eq!(filters[0].op, CompareOp::Ge);
    }

    #[test]
    fn test_filters_on_binary_item_rejected() {
        let err = layout()
            .filters(&[SearchFilter {
                id: UserDataId(2),
                op: CompareOp::Eq,
                value: 0,
            }])
            .unwrap_err();
        assert!(matches!(err, LobbyError::InvalidParam));
    }
}
