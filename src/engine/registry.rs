use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::model::*;

use super::combinations::Combinations;
use super::error::{IneligibleReason, RegistryError, ValidationError};

/// A table without its combination view. The registry never stores
/// `combined_with` per table; it derives it from [`Combinations`].
#[derive(Debug, Clone, PartialEq, Eq)]
struct TableEntry {
    id: TableId,
    name: String,
    capacity: u32,
    status: TableStatus,
    section: String,
    current_order_id: Option<OrderId>,
    reservation_id: Option<ReservationId>,
}

impl TableEntry {
    fn from_record(t: Table) -> Self {
        Self {
            id: t.id,
            name: t.name,
            capacity: t.capacity,
            status: t.status,
            section: t.section,
            current_order_id: t.current_order_id,
            reservation_id: t.reservation_id,
        }
    }

    fn view(&self, combinations: &Combinations) -> Table {
        Table {
            id: self.id,
            name: self.name.clone(),
            capacity: self.capacity,
            status: self.status,
            section: self.section.clone(),
            combined_with: combinations.partners(self.id),
            current_order_id: self.current_order_id,
            reservation_id: self.reservation_id,
        }
    }

    /// Occupied tables and tables with an open order refuse structural changes.
    fn locked(&self) -> Option<IneligibleReason> {
        if self.status == TableStatus::Occupied {
            Some(IneligibleReason::Occupied)
        } else if self.current_order_id.is_some() {
            Some(IneligibleReason::ActiveOrder)
        } else {
            None
        }
    }
}

/// Owns one tenant's tables, their status, and the combination graph.
///
/// Every operation checks all of its preconditions before touching state,
/// so an `Err` always leaves the registry exactly as it was. Successful
/// mutations return the ids of every table whose record changed; the
/// caller writes those back to the record store.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: BTreeMap<TableId, TableEntry>,
    combinations: Combinations,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from store records. Self-links and links to unknown tables
    /// are dropped; one-sided links are made mutual.
    pub fn from_records(records: impl IntoIterator<Item = Table>) -> Self {
        let records: Vec<Table> = records.into_iter().collect();
        let known: BTreeSet<TableId> = records.iter().map(|t| t.id).collect();
        let mut combinations = Combinations::new();

        for t in &records {
            for &partner in &t.combined_with {
                if partner == t.id {
                    warn!(table = %t.id, "dropping self-combination from stored record");
                    continue;
                }
                if !known.contains(&partner) {
                    warn!(table = %t.id, %partner, "dropping combination with unknown table");
                    continue;
                }
                let mutual = records
                    .iter()
                    .any(|p| p.id == partner && p.combined_with.contains(&t.id));
                if !mutual {
                    warn!(table = %t.id, %partner, "repairing one-sided combination");
                }
                combinations.link(t.id, partner);
            }
        }

        let tables = records
            .into_iter()
            .map(|t| (t.id, TableEntry::from_record(t)))
            .collect();
        Self { tables, combinations }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn contains(&self, id: &TableId) -> bool {
        self.tables.contains_key(id)
    }

    pub fn get(&self, id: &TableId) -> Option<Table> {
        self.tables.get(id).map(|e| e.view(&self.combinations))
    }

    /// All tables, ordered by id.
    pub fn tables(&self) -> Vec<Table> {
        self.tables.values().map(|e| e.view(&self.combinations)).collect()
    }

    /// The table plus everything it is combined with.
    pub fn group_of(&self, id: &TableId) -> BTreeSet<TableId> {
        let mut group = self.combinations.partners(*id);
        group.insert(*id);
        group
    }

    fn entry(&self, id: &TableId) -> Result<&TableEntry, RegistryError> {
        self.tables.get(id).ok_or(RegistryError::NotFound(*id))
    }

    fn entry_mut(&mut self, id: &TableId) -> Result<&mut TableEntry, RegistryError> {
        self.tables.get_mut(id).ok_or(RegistryError::NotFound(*id))
    }

    // ── Lifecycle ────────────────────────────────────────────

    /// Register a new table. It always starts `Available` and uncombined,
    /// whatever the incoming record says.
    pub fn add(&mut self, table: Table) -> Result<(), RegistryError> {
        if table.capacity == 0 {
            return Err(ValidationError::ZeroCapacity.into());
        }
        if self.tables.contains_key(&table.id) {
            return Err(RegistryError::AlreadyExists(table.id));
        }
        let mut entry = TableEntry::from_record(table);
        entry.status = TableStatus::Available;
        entry.current_order_id = None;
        entry.reservation_id = None;
        self.tables.insert(entry.id, entry);
        Ok(())
    }

    pub fn update_details(
        &mut self,
        id: &TableId,
        name: Option<String>,
        capacity: Option<u32>,
        section: Option<String>,
    ) -> Result<(), RegistryError> {
        if capacity == Some(0) {
            return Err(ValidationError::ZeroCapacity.into());
        }
        let entry = self.entry_mut(id)?;
        if let Some(name) = name {
            entry.name = name;
        }
        if let Some(capacity) = capacity {
            entry.capacity = capacity;
        }
        if let Some(section) = section {
            entry.section = section;
        }
        Ok(())
    }

    /// Remove a table, first severing its combination links.
    /// Returns the removed record and the partners whose view changed.
    pub fn delete(&mut self, id: &TableId) -> Result<(Table, Vec<TableId>), RegistryError> {
        let entry = self.entry(id)?;
        if entry.locked().is_some() {
            return Err(RegistryError::Occupied(*id));
        }
        let removed = entry.view(&self.combinations);
        let partners = self.combinations.unlink(*id);
        self.tables.remove(id);
        Ok((removed, partners.into_iter().collect()))
    }

    // ── Combination ──────────────────────────────────────────

    fn combine_blocker(&self, entry: &TableEntry) -> Option<IneligibleReason> {
        if let Some(reason) = entry.locked() {
            return Some(reason);
        }
        if entry.status != TableStatus::Available {
            return Some(IneligibleReason::NotAvailable(entry.status));
        }
        if self.combinations.is_combined(entry.id) {
            return Some(IneligibleReason::AlreadyCombined);
        }
        None
    }

    /// Merge `ids` into one seating unit. All-or-nothing.
    pub fn combine(&mut self, ids: &BTreeSet<TableId>) -> Result<Vec<TableId>, RegistryError> {
        if ids.len() < 2 {
            return Err(ValidationError::TooFewToCombine(ids.len()).into());
        }
        for id in ids {
            self.entry(id)?;
        }
        for id in ids {
            let entry = self.entry(id)?;
            if let Some(reason) = self.combine_blocker(entry) {
                return Err(RegistryError::Ineligible { table: *id, reason });
            }
        }

        self.combinations.link_all(ids);
        Ok(ids.iter().copied().collect())
    }

    /// Split tables out of their groups. Each separated table goes back to
    /// `Available`; its former partners simply lose it from their view.
    /// A table that is not combined is left untouched.
    pub fn separate(&mut self, ids: &BTreeSet<TableId>) -> Result<Vec<TableId>, RegistryError> {
        if ids.is_empty() {
            return Err(ValidationError::NoTables.into());
        }
        for id in ids {
            let entry = self.entry(id)?;
            if let Some(reason) = entry.locked() {
                return Err(RegistryError::Ineligible { table: *id, reason });
            }
        }

        let mut affected = BTreeSet::new();
        for id in ids {
            let partners = self.combinations.unlink(*id);
            if partners.is_empty() && !affected.contains(id) {
                continue;
            }
            affected.insert(*id);
            affected.extend(partners);
            if let Some(entry) = self.tables.get_mut(id) {
                entry.status = TableStatus::Available;
            }
        }
        Ok(affected.into_iter().collect())
    }

    /// Tables that may be offered as combination candidates right now.
    pub fn eligible_for_combination(&self) -> Vec<Table> {
        self.tables
            .values()
            .filter(|e| e.status == TableStatus::Available && e.current_order_id.is_none())
            .map(|e| e.view(&self.combinations))
            .collect()
    }

    pub fn combined_groups(&self) -> Vec<BTreeSet<TableId>> {
        self.combinations.groups()
    }

    // ── Status, orders, reservations ─────────────────────────
    //
    // Combined tables move together: status changes apply to the whole group.

    /// Set the status of a table and its combined partners.
    pub fn set_status(&mut self, id: &TableId, status: TableStatus) -> Result<Vec<TableId>, RegistryError> {
        let group = self.group_of(id);
        self.entry(id)?;
        if status != TableStatus::Occupied {
            for member in &group {
                if self.entry(member)?.current_order_id.is_some() {
                    return Err(RegistryError::Ineligible {
                        table: *member,
                        reason: IneligibleReason::ActiveOrder,
                    });
                }
            }
        }
        let mut changed = Vec::new();
        for member in &group {
            let entry = self.entry_mut(member)?;
            if entry.status != status {
                entry.status = status;
                changed.push(*member);
            }
        }
        Ok(changed)
    }

    /// Attach an order to a table. The table's whole group becomes `Occupied`.
    pub fn open_order(&mut self, id: &TableId, order: OrderId) -> Result<Vec<TableId>, RegistryError> {
        let entry = self.entry(id)?;
        if entry.current_order_id.is_some() {
            return Err(RegistryError::Ineligible {
                table: *id,
                reason: IneligibleReason::ActiveOrder,
            });
        }
        if entry.status == TableStatus::Cleaning {
            return Err(RegistryError::Ineligible {
                table: *id,
                reason: IneligibleReason::NotAvailable(TableStatus::Cleaning),
            });
        }
        let group = self.group_of(id);
        self.entry_mut(id)?.current_order_id = Some(order);
        for member in &group {
            self.entry_mut(member)?.status = TableStatus::Occupied;
        }
        Ok(group.into_iter().collect())
    }

    /// Detach the table's order. Once no member of the group has an order
    /// left, the group goes to `Cleaning`. Closing a table with no order is
    /// a no-op.
    pub fn close_order(&mut self, id: &TableId) -> Result<Option<(OrderId, Vec<TableId>)>, RegistryError> {
        let Some(order) = self.entry_mut(id)?.current_order_id.take() else {
            return Ok(None);
        };
        let group = self.group_of(id);
        let still_serving = group
            .iter()
            .any(|m| self.tables.get(m).is_some_and(|e| e.current_order_id.is_some()));
        if !still_serving {
            for member in &group {
                self.entry_mut(member)?.status = TableStatus::Cleaning;
            }
        }
        Ok(Some((order, group.into_iter().collect())))
    }

    /// Point free tables at a new reservation and mark them `Reserved`.
    /// Tables already pointing at another reservation, or not `Available`,
    /// keep their status.
    pub fn assign_reservation(&mut self, reservation: ReservationId, ids: &[TableId]) -> Vec<TableId> {
        let mut changed = Vec::new();
        for id in ids {
            let Some(entry) = self.tables.get_mut(id) else { continue };
            if entry.reservation_id.is_some() {
                continue;
            }
            entry.reservation_id = Some(reservation);
            if entry.status == TableStatus::Available {
                entry.status = TableStatus::Reserved;
            }
            changed.push(*id);
        }
        changed
    }

    /// Seat a reservation: its tables and their partners become `Occupied`.
    pub fn seat_reservation(&mut self, reservation: ReservationId, ids: &[TableId]) -> Result<Vec<TableId>, RegistryError> {
        let mut group = BTreeSet::new();
        for id in ids {
            let entry = self.entry(id)?;
            if entry.status == TableStatus::Occupied || entry.current_order_id.is_some() {
                return Err(RegistryError::Ineligible {
                    table: *id,
                    reason: entry.locked().unwrap_or(IneligibleReason::Occupied),
                });
            }
            group.extend(self.group_of(id));
        }
        for member in &group {
            let entry = self.entry_mut(member)?;
            entry.status = TableStatus::Occupied;
            if ids.contains(member) {
                entry.reservation_id = Some(reservation);
            }
        }
        Ok(group.into_iter().collect())
    }

    /// Drop every back-reference to `reservation`. Reserved tables become
    /// `Available`. When the party has finished, the groups it sat at go to
    /// `Cleaning`, unless a member still has an open order.
    pub fn release_reservation(&mut self, reservation: ReservationId, finished: bool) -> Vec<TableId> {
        let held: Vec<TableId> = self
            .tables
            .values()
            .filter(|e| e.reservation_id == Some(reservation))
            .map(|e| e.id)
            .collect();

        let mut changed = BTreeSet::new();
        for id in &held {
            let Some(entry) = self.tables.get_mut(id) else { continue };
            entry.reservation_id = None;
            if entry.status == TableStatus::Reserved {
                entry.status = TableStatus::Available;
            }
            changed.insert(*id);
        }

        if finished {
            let mut seated = BTreeSet::new();
            for id in &held {
                seated.extend(self.group_of(id));
            }
            let still_serving = seated
                .iter()
                .any(|m| self.tables.get(m).is_some_and(|e| e.current_order_id.is_some()));
            if !still_serving {
                for member in &seated {
                    if let Some(entry) = self.tables.get_mut(member)
                        && entry.status == TableStatus::Occupied
                    {
                        entry.status = TableStatus::Cleaning;
                        changed.insert(*member);
                    }
                }
            }
        }
        changed.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn registry(n: usize) -> (TableRegistry, Vec<TableId>) {
        let mut reg = TableRegistry::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let id = Ulid::new();
            reg.add(Table::new(id, format!("T{}", i + 1), 4, "main")).unwrap();
            ids.push(id);
        }
        (reg, ids)
    }

    fn set(ids: &[TableId]) -> BTreeSet<TableId> {
        ids.iter().copied().collect()
    }

    fn assert_symmetric(reg: &TableRegistry) {
        let tables = reg.tables();
        for a in &tables {
            assert!(!a.combined_with.contains(&a.id), "{} lists itself", a.id);
            for b in &tables {
                assert_eq!(
                    a.combined_with.contains(&b.id),
                    b.combined_with.contains(&a.id),
                    "asymmetric link between {} and {}",
                    a.id,
                    b.id
                );
            }
        }
    }

    #[test]
    fn combine_then_separate_scenario() {
        let (mut reg, t) = registry(2);
        let changed = reg.combine(&set(&t)).unwrap();
        assert_eq!(changed.len(), 2);

        let t1 = reg.get(&t[0]).unwrap();
        let t2 = reg.get(&t[1]).unwrap();
        assert_eq!(t1.combined_with, set(&[t[1]]));
        assert_eq!(t2.combined_with, set(&[t[0]]));
        assert_eq!(t1.status, TableStatus::Available);
        assert_eq!(t2.status, TableStatus::Available);
        assert_symmetric(&reg);

        reg.separate(&set(&[t[0]])).unwrap();
        let t1 = reg.get(&t[0]).unwrap();
        let t2 = reg.get(&t[1]).unwrap();
        assert!(t1.combined_with.is_empty());
        assert!(t2.combined_with.is_empty());
        assert_eq!(t1.status, TableStatus::Available);
        assert_eq!(t2.status, TableStatus::Available);
        assert_symmetric(&reg);
    }

    #[test]
    fn combine_three_builds_full_group() {
        let (mut reg, t) = registry(3);
        reg.combine(&set(&t)).unwrap();
        for id in &t {
            let table = reg.get(id).unwrap();
            let mut expected = set(&t);
            expected.remove(id);
            assert_eq!(table.combined_with, expected);
        }
        assert_eq!(reg.combined_groups(), vec![set(&t)]);
        assert_symmetric(&reg);
    }

    #[test]
    fn combine_needs_two() {
        let (mut reg, t) = registry(1);
        assert_eq!(
            reg.combine(&set(&t)),
            Err(RegistryError::Validation(ValidationError::TooFewToCombine(1)))
        );
        assert_eq!(
            reg.combine(&BTreeSet::new()),
            Err(RegistryError::Validation(ValidationError::TooFewToCombine(0)))
        );
    }

    #[test]
    fn combine_unknown_table() {
        let (mut reg, t) = registry(1);
        let ghost = Ulid::new();
        assert_eq!(reg.combine(&set(&[t[0], ghost])), Err(RegistryError::NotFound(ghost)));
        assert!(reg.get(&t[0]).unwrap().combined_with.is_empty());
    }

    #[test]
    fn combine_is_all_or_nothing() {
        let (mut reg, t) = registry(3);
        reg.set_status(&t[2], TableStatus::Reserved).unwrap();
        let before = reg.tables();

        let err = reg.combine(&set(&t)).unwrap_err();
        assert_eq!(
            err,
            RegistryError::Ineligible {
                table: t[2],
                reason: IneligibleReason::NotAvailable(TableStatus::Reserved),
            }
        );
        assert_eq!(reg.tables(), before);
        assert!(reg.combined_groups().is_empty());
    }

    #[test]
    fn combine_rejects_occupied_and_ordered_tables() {
        let (mut reg, t) = registry(3);
        reg.set_status(&t[0], TableStatus::Occupied).unwrap();
        let err = reg.combine(&set(&[t[0], t[1]])).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Ineligible { reason: IneligibleReason::Occupied, .. }
        ));

        let (mut reg, t) = registry(2);
        reg.open_order(&t[1], Ulid::new()).unwrap();
        let err = reg.combine(&set(&t)).unwrap_err();
        assert!(matches!(err, RegistryError::Ineligible { table, .. } if table == t[1]));
    }

    #[test]
    fn combine_rejects_already_combined() {
        let (mut reg, t) = registry(3);
        reg.combine(&set(&[t[0], t[1]])).unwrap();
        let err = reg.combine(&set(&[t[1], t[2]])).unwrap_err();
        assert_eq!(
            err,
            RegistryError::Ineligible {
                table: t[1],
                reason: IneligibleReason::AlreadyCombined,
            }
        );
        assert!(reg.get(&t[2]).unwrap().combined_with.is_empty());
        assert_symmetric(&reg);
    }

    #[test]
    fn separate_is_idempotent() {
        let (mut reg, t) = registry(2);
        reg.combine(&set(&t)).unwrap();

        reg.separate(&set(&[t[0]])).unwrap();
        let once = reg.tables();
        let changed = reg.separate(&set(&[t[0]])).unwrap();
        assert!(changed.is_empty());
        assert_eq!(reg.tables(), once);
    }

    #[test]
    fn separate_uncombined_keeps_status() {
        let (mut reg, t) = registry(1);
        reg.set_status(&t[0], TableStatus::Cleaning).unwrap();
        assert!(reg.separate(&set(&t)).unwrap().is_empty());
        assert_eq!(reg.get(&t[0]).unwrap().status, TableStatus::Cleaning);
    }

    #[test]
    fn separate_one_of_three_leaves_pair() {
        let (mut reg, t) = registry(3);
        reg.combine(&set(&t)).unwrap();
        let changed = reg.separate(&set(&[t[0]])).unwrap();
        assert_eq!(set(&changed), set(&t));
        assert!(reg.get(&t[0]).unwrap().combined_with.is_empty());
        assert_eq!(reg.get(&t[1]).unwrap().combined_with, set(&[t[2]]));
        assert_eq!(reg.combined_groups(), vec![set(&[t[1], t[2]])]);
        assert_symmetric(&reg);
    }

    #[test]
    fn separate_refuses_occupied_member() {
        let (mut reg, t) = registry(2);
        reg.combine(&set(&t)).unwrap();
        reg.open_order(&t[0], Ulid::new()).unwrap();
        let before = reg.tables();
        let err = reg.separate(&set(&t)).unwrap_err();
        assert!(matches!(err, RegistryError::Ineligible { .. }));
        assert_eq!(reg.tables(), before);
    }

    #[test]
    fn separate_empty_set() {
        let (mut reg, _) = registry(1);
        assert_eq!(
            reg.separate(&BTreeSet::new()),
            Err(RegistryError::Validation(ValidationError::NoTables))
        );
    }

    #[test]
    fn delete_combined_table_unlinks_partner() {
        let (mut reg, t) = registry(2);
        reg.combine(&set(&t)).unwrap();
        let (removed, partners) = reg.delete(&t[0]).unwrap();
        assert_eq!(removed.id, t[0]);
        assert_eq!(partners, vec![t[1]]);
        assert!(reg.get(&t[0]).is_none());
        assert!(reg.get(&t[1]).unwrap().combined_with.is_empty());
        assert_symmetric(&reg);
    }

    #[test]
    fn delete_with_order_fails_regardless_of_status() {
        let (mut reg, t) = registry(1);
        reg.open_order(&t[0], Ulid::new()).unwrap();
        // Force a non-occupied status while the order is still attached.
        reg.tables.get_mut(&t[0]).unwrap().status = TableStatus::Available;
        assert_eq!(reg.delete(&t[0]), Err(RegistryError::Occupied(t[0])));
        assert!(reg.contains(&t[0]));
    }

    #[test]
    fn delete_occupied_fails() {
        let (mut reg, t) = registry(1);
        reg.set_status(&t[0], TableStatus::Occupied).unwrap();
        assert_eq!(reg.delete(&t[0]), Err(RegistryError::Occupied(t[0])));
    }

    #[test]
    fn delete_unknown() {
        let (mut reg, _) = registry(0);
        let id = Ulid::new();
        assert_eq!(reg.delete(&id), Err(RegistryError::NotFound(id)));
    }

    #[test]
    fn eligible_excludes_reserved_and_occupied() {
        let (mut reg, t) = registry(4);
        reg.set_status(&t[0], TableStatus::Reserved).unwrap();
        reg.set_status(&t[1], TableStatus::Occupied).unwrap();
        let eligible: BTreeSet<TableId> = reg.eligible_for_combination().iter().map(|t| t.id).collect();
        assert_eq!(eligible, set(&[t[2], t[3]]));

        // Recomputed from current state each call.
        reg.set_status(&t[0], TableStatus::Available).unwrap();
        assert_eq!(reg.eligible_for_combination().len(), 3);
    }

    #[test]
    fn add_forces_fresh_state() {
        let mut reg = TableRegistry::new();
        let mut t = Table::new(Ulid::new(), "T9", 2, "bar");
        t.status = TableStatus::Occupied;
        t.combined_with.insert(Ulid::new());
        reg.add(t.clone()).unwrap();
        let stored = reg.get(&t.id).unwrap();
        assert_eq!(stored.status, TableStatus::Available);
        assert!(stored.combined_with.is_empty());
        assert_eq!(reg.add(t.clone()), Err(RegistryError::AlreadyExists(t.id)));
    }

    #[test]
    fn add_rejects_zero_capacity() {
        let mut reg = TableRegistry::new();
        let t = Table::new(Ulid::new(), "T0", 0, "bar");
        assert_eq!(reg.add(t), Err(RegistryError::Validation(ValidationError::ZeroCapacity)));
    }

    #[test]
    fn from_records_repairs_drift() {
        let a = Ulid::new();
        let b = Ulid::new();
        let ghost = Ulid::new();
        let mut ta = Table::new(a, "A", 2, "x");
        let tb = Table::new(b, "B", 2, "x");
        ta.combined_with = set(&[a, b, ghost]); // self, one-sided, dangling

        let reg = TableRegistry::from_records(vec![ta, tb]);
        assert_eq!(reg.get(&a).unwrap().combined_with, set(&[b]));
        assert_eq!(reg.get(&b).unwrap().combined_with, set(&[a]));
        assert_symmetric(&reg);
    }

    #[test]
    fn status_moves_with_group() {
        let (mut reg, t) = registry(3);
        reg.combine(&set(&[t[0], t[1]])).unwrap();
        let changed = reg.set_status(&t[0], TableStatus::Cleaning).unwrap();
        assert_eq!(set(&changed), set(&[t[0], t[1]]));
        assert_eq!(reg.get(&t[1]).unwrap().status, TableStatus::Cleaning);
        assert_eq!(reg.get(&t[2]).unwrap().status, TableStatus::Available);
    }

    #[test]
    fn order_lifecycle() {
        let (mut reg, t) = registry(2);
        reg.combine(&set(&t)).unwrap();
        let order = Ulid::new();
        reg.open_order(&t[0], order).unwrap();
        assert_eq!(reg.get(&t[0]).unwrap().current_order_id, Some(order));
        assert_eq!(reg.get(&t[1]).unwrap().status, TableStatus::Occupied);

        let err = reg.open_order(&t[0], Ulid::new()).unwrap_err();
        assert!(matches!(err, RegistryError::Ineligible { reason: IneligibleReason::ActiveOrder, .. }));

        let err = reg.set_status(&t[1], TableStatus::Available).unwrap_err();
        assert!(matches!(err, RegistryError::Ineligible { table, .. } if table == t[0]));

        let (closed, _) = reg.close_order(&t[0]).unwrap().unwrap();
        assert_eq!(closed, order);
        assert_eq!(reg.get(&t[0]).unwrap().status, TableStatus::Cleaning);
        assert_eq!(reg.get(&t[1]).unwrap().status, TableStatus::Cleaning);
        assert!(reg.close_order(&t[0]).unwrap().is_none());
    }

    #[test]
    fn reservation_back_references() {
        let (mut reg, t) = registry(2);
        let r = Ulid::new();
        let changed = reg.assign_reservation(r, &t);
        assert_eq!(changed.len(), 2);
        assert_eq!(reg.get(&t[0]).unwrap().status, TableStatus::Reserved);
        assert_eq!(reg.get(&t[0]).unwrap().reservation_id, Some(r));

        // A second reservation does not steal the back-reference.
        assert!(reg.assign_reservation(Ulid::new(), &t[..1]).is_empty());

        reg.seat_reservation(r, &t).unwrap();
        assert_eq!(reg.get(&t[1]).unwrap().status, TableStatus::Occupied);

        let released = reg.release_reservation(r, true);
        assert_eq!(released.len(), 2);
        assert_eq!(reg.get(&t[0]).unwrap().status, TableStatus::Cleaning);
        assert!(reg.get(&t[0]).unwrap().reservation_id.is_none());
    }

    #[test]
    fn cancelled_reservation_frees_reserved_tables() {
        let (mut reg, t) = registry(1);
        let r = Ulid::new();
        reg.assign_reservation(r, &t);
        reg.release_reservation(r, false);
        let table = reg.get(&t[0]).unwrap();
        assert_eq!(table.status, TableStatus::Available);
        assert!(table.reservation_id.is_none());
    }

    #[test]
    fn finishing_a_seated_reservation_cleans_the_whole_group() {
        let (mut reg, t) = registry(3);
        reg.combine(&set(&t[..2])).unwrap();
        let r = Ulid::new();
        reg.assign_reservation(r, &t[..1]);
        let seated = reg.seat_reservation(r, &t[..1]).unwrap();
        assert_eq!(set(&seated), set(&t[..2]));

        let released = reg.release_reservation(r, true);
        assert_eq!(set(&released), set(&t[..2]));
        for id in &t[..2] {
            assert_eq!(reg.get(id).unwrap().status, TableStatus::Cleaning);
        }
        assert_eq!(reg.get(&t[2]).unwrap().status, TableStatus::Available);

        // The partner is no longer stuck and can leave the group.
        reg.set_status(&t[1], TableStatus::Available).unwrap();
        assert_eq!(reg.separate(&set(&t[1..2])).unwrap().len(), 2);
    }

    #[test]
    fn finished_group_with_open_order_stays_occupied() {
        let (mut reg, t) = registry(2);
        reg.combine(&set(&t)).unwrap();
        let r = Ulid::new();
        reg.seat_reservation(r, &t[..1]).unwrap();
        reg.open_order(&t[1], Ulid::new()).unwrap();

        reg.release_reservation(r, true);
        assert!(t.iter().all(|id| reg.get(id).unwrap().status == TableStatus::Occupied));
        assert!(reg.get(&t[0]).unwrap().reservation_id.is_none());
    }
}
