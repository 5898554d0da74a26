/*!

This is the long-form manual for `club_elections` and `clubvote`.

## The election cycle

1. An administrator defines the positions of a club (president, treasurer,
   ...). Editing the list replaces it entirely.
2. A nomination is opened for the club. Members apply for positions while it
   is active and within its dates. Administrators approve or reject the
   applications; the approved ones are the candidates.
3. The nomination is closed and a voting event is created. The event takes
   the latest closed nomination of the club as its ballot. A draft event
   takes it again when it is edited or activated, so it may be created
   before the nomination closes.
4. While the event is active and within its dates, each active member casts
   at most one vote per position.
5. Closing the event computes and stores the winner of every position.

## Exclusivity

A club has at most one active nomination, and at most one voting event in
the draft or active state. A voting event cannot be created, activated or
edited while the club has an active nomination. These rules also hold when
several processes share the same database file.

## States

Nominations and voting events go through `draft`, `active`, `closed` and
`archived`, in that order. Closing twice is refused. Only drafts and
nominations without applications may be deleted.

Once a voting event using a nomination has left the draft state, the
nomination's applications can no longer be approved or rejected.

## Winners

For each position, the candidate with the most votes wins. Positions without
candidates or without any vote have no winner.

### Ties

When several candidates share the top count, the winner row is flagged
`is_tie_resolved` and the winner is picked according to `tiebreakMode`:

* `earliestApplication` (default): the application submitted first wins.
* `random`: candidates are ordered by the SHA-256 hash of `randomSeed`, the
  voting event and the application. The order cannot be guessed from the
  applications but is the same every time it is computed.

Winners can be recomputed on a closed event, which replaces the stored rows.

## Position holders

The holder of a position is the winner from the club's latest closed voting
event. Without one, the member manually assigned to the position holds it.

## Configuration

`clubvote` reads a JSON file passed with `--config`:

```json
{
  "databasePath": "clubvote.sqlite3",
  "busyTimeoutMs": 5000,
  "tiebreakMode": "earliestApplication",
  "randomSeed": "42",
  "permissions": { "1": ["*"], "7": ["vote", "apply"] }
}
```

`permissions` maps a user id to the permissions it holds: `manage-clubs`,
`manage-members`, `manage-nominations`, `manage-voting-events`, `apply`,
`vote`, or `*` for all of them. Without a configuration file, only user 0
may act.

*/
